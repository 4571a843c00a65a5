//! End-to-end routing through the server multiplexer over loopback UDP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use objcast::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Tag {
    id: u32,
    label: String,
}

impl StreamableType for Tag {
    const TYPE_NAME: &'static str = "test.Tag";

    fn write_fields(&self, _: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.put_u32(self.id);
        buf.put_str(&self.label)?;
        Ok(())
    }

    fn read_fields(_: &mut ObjectReader, buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Tag {
            id: buf.get_u32()?,
            label: buf.get_string()?,
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::new().with::<Tag>().unwrap())
}

fn tag(id: u32) -> Tag {
    Tag {
        id,
        label: format!("client-{id}"),
    }
}

async fn server(clients_per_channel: usize) -> ServerSocket {
    ServerSocketBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .clients_per_channel(clients_per_channel)
        .bind(registry())
        .await
        .unwrap()
}

async fn clients(server: SocketAddr, n: u32) -> Vec<ClientSocket> {
    let mut clients = Vec::new();
    for _ in 0..n {
        let client = ClientSocketBuilder::new()
            .server_addr(server)
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .connect(registry())
            .await
            .unwrap();
        clients.push(client);
    }
    clients
}

/// Drain events until `objects` objects arrived; returns peer -> tag and
/// peer -> channel.
async fn collect(
    server: &mut ServerSocket,
    objects: usize,
) -> (HashMap<SocketAddr, Tag>, HashMap<SocketAddr, usize>) {
    let mut tags = HashMap::new();
    let mut channels = HashMap::new();
    while tags.len() < objects {
        match server.recv().await.unwrap() {
            ServerEvent::Connected { peer, channel } => {
                channels.insert(peer, channel);
            }
            ServerEvent::Object {
                peer,
                object: Some(object),
                ..
            } => {
                let tag = object.downcast::<Tag>().unwrap();
                tags.insert(peer, *tag);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    (tags, channels)
}

#[tokio::test]
async fn test_each_source_gets_its_own_connection() {
    init_tracing();
    let mut server = server(UNBOUNDED_CLIENTS).await;
    let mut clients = clients(server.local_addr(), 4).await;

    for (id, client) in (0..).zip(clients.iter_mut()) {
        client.send_value(Some(&tag(id))).await.unwrap();
    }
    let (tags, channels) = collect(&mut server, 4).await;

    assert_eq!(server.connection_count(), 4);
    assert_eq!(server.channel_count(), 1);
    for (id, client) in (0..).zip(clients.iter()) {
        let addr = client.local_addr().unwrap();
        assert_eq!(tags[&addr], tag(id));
        assert_eq!(channels[&addr], 0);
    }

    // Replies go back to the right peer only
    for (addr, received) in &tags {
        let echo = Tag {
            id: received.id + 100,
            label: received.label.clone(),
        };
        server.send_value(*addr, Some(&echo)).await.unwrap();
    }
    for (id, client) in (0..).zip(clients.iter_mut()) {
        let reply = client.recv_value::<Tag>().await.unwrap().unwrap();
        assert_eq!(reply.id, id + 100);
        assert_eq!(client.server_addr(), server.local_addr());
    }
}

#[tokio::test]
async fn test_pool_never_exceeds_capacity() {
    init_tracing();
    let mut server = server(2).await;
    let mut clients = clients(server.local_addr(), 5).await;

    for (id, client) in (0..).zip(clients.iter_mut()) {
        client.send_value(Some(&tag(id))).await.unwrap();
    }
    let (_, channels) = collect(&mut server, 5).await;

    assert_eq!(server.pool_channel_count(), 3);
    for slot in 0..server.pool_channel_count() {
        assert!(server.pool_occupancy(slot) <= 2);
    }
    // Primary plus three pool sockets
    assert_eq!(server.channel_count(), 4);

    // Each client ends up talking to its pool socket
    for client in clients.iter_mut() {
        let addr = client.local_addr().unwrap();
        server.send_value(addr, Some(&tag(0))).await.unwrap();
        client.recv_value::<Tag>().await.unwrap();
        assert_eq!(Some(client.server_addr()), server.channel_addr(channels[&addr]));
    }

    // Follow-up traffic arrives through the pool sockets
    for (id, client) in (10..).zip(clients.iter_mut()) {
        client.send_value(Some(&tag(id))).await.unwrap();
    }
    let (tags, _) = collect(&mut server, 5).await;
    for (id, client) in (10..).zip(clients.iter()) {
        assert_eq!(tags[&client.local_addr().unwrap()].id, id);
    }
}

#[tokio::test]
async fn test_dedicated_socket_per_client() {
    init_tracing();
    let mut server = server(1).await;
    let mut clients = clients(server.local_addr(), 3).await;

    for (id, client) in (0..).zip(clients.iter_mut()) {
        client.send_value(Some(&tag(id))).await.unwrap();
    }
    let (_, channels) = collect(&mut server, 3).await;

    assert_eq!(server.channel_count(), 4);
    let mut distinct: Vec<usize> = channels.values().copied().collect();
    distinct.sort_unstable();
    assert_eq!(distinct, vec![1, 2, 3]);

    for client in clients.iter_mut() {
        let addr = client.local_addr().unwrap();
        server.send_value(addr, Some(&tag(7))).await.unwrap();
        assert_eq!(client.recv_value::<Tag>().await.unwrap(), Some(tag(7)));
        assert_ne!(client.server_addr(), server.local_addr());
    }
}

#[tokio::test]
async fn test_confirmed_metadata_is_not_resent() {
    init_tracing();
    let mut server = server(UNBOUNDED_CLIENTS).await;
    let mut clients = clients(server.local_addr(), 1).await;
    let client = &mut clients[0];

    client.send_value(Some(&tag(1))).await.unwrap();
    collect(&mut server, 1).await;
    assert_eq!(client.connection().writer().code_of::<Tag>(), Some(-1));

    // The application learned out of band that the server has the metadata
    let writer = client.connection_mut().writer_mut();
    let round = writer.take_round();
    writer.note_metadata_cached(round).unwrap();
    assert_eq!(writer.code_of::<Tag>(), Some(1));

    client.send_value(Some(&tag(2))).await.unwrap();
    let (tags, _) = collect(&mut server, 1).await;
    assert_eq!(tags[&client.local_addr().unwrap()], tag(2));
}
