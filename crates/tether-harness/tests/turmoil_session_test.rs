//! Full nodes over turmoil's simulated network.
//!
//! The real `Node` and `RendezvousServer` run unchanged; only the
//! environment and transport are swapped for their simulated versions.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tether_core::{FaultKind, Role};
use tether_harness::{SimEnv, SimTransport};
use tether_node::{Node, NodeConfig, NodeHandle, Notice, RendezvousConfig, RendezvousServer};
use tether_proto::PeerAddress;

const RENDEZVOUS: &str = "rendezvous:7400";

fn node_config() -> NodeConfig {
    NodeConfig {
        rendezvous_address: RENDEZVOUS.to_string(),
        listen_address: "0.0.0.0:9000".to_string(),
        ..NodeConfig::default()
    }
}

async fn start_node(seed: u64) -> Result<NodeHandle, Box<dyn std::error::Error>> {
    // Give the rendezvous host a moment to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (handle, _task) = Node::spawn(SimEnv::with_seed(seed), SimTransport, node_config()).await?;
    Ok(handle)
}

fn add_rendezvous(sim: &mut turmoil::Sim<'_>) {
    sim.host("rendezvous", || async {
        let config = RendezvousConfig { bind_address: "0.0.0.0:7400".to_string() };
        let server = RendezvousServer::bind(SimEnv::with_seed(1), &SimTransport, &config).await?;
        server.run().await?;
        Ok(())
    });
}

async fn wait_for_address(shared: &Mutex<Option<PeerAddress>>) -> PeerAddress {
    loop {
        if let Some(address) = shared.lock().unwrap().clone() {
            return address;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
fn peers_chat_through_host() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .rng_seed(7)
        .build();

    let host_address: Arc<Mutex<Option<PeerAddress>>> = Arc::new(Mutex::new(None));
    let joined = Arc::new(AtomicUsize::new(0));

    add_rendezvous(&mut sim);

    let shared = Arc::clone(&host_address);
    sim.host("host", move || {
        let shared = Arc::clone(&shared);
        async move {
            let node = start_node(2).await?;
            let address = node.open_session().await?;
            node.become_host().await?;
            *shared.lock().unwrap() = Some(address);

            std::future::pending::<()>().await;
            Ok(())
        }
    });

    let shared = Arc::clone(&host_address);
    let count = Arc::clone(&joined);
    sim.client("alice", async move {
        let node = start_node(3).await?;
        let host = wait_for_address(&shared).await;
        node.open_session().await?;
        node.connect_to_peer(host).await?;
        count.fetch_add(1, Ordering::SeqCst);

        while count.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Bob's channel is confirmed on the host a moment after bob's own.
        tokio::time::sleep(Duration::from_millis(200)).await;
        node.submit_message("hi from alice").await?;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = node.status().await?;
        assert_eq!(status.role, Some(Role::Peer));
        assert_eq!(status.messages.iter().filter(|m| m.text == "hi from alice").count(), 1);
        assert!(status.faults.is_empty());
        Ok(())
    });

    let shared = Arc::clone(&host_address);
    let count = Arc::clone(&joined);
    sim.client("bob", async move {
        let node = start_node(4).await?;
        let mut notices = node.subscribe();
        let host = wait_for_address(&shared).await;
        node.open_session().await?;
        let channel = node.connect_to_peer(host.clone()).await?;
        assert_eq!(channel.remote, host);
        count.fetch_add(1, Ordering::SeqCst);

        loop {
            if let Ok(Notice::Message(message)) = notices.recv().await {
                if message.text == "hi from alice" {
                    break;
                }
            }
        }

        let status = node.status().await?;
        assert_eq!(status.connections.len(), 1);
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn unknown_address_is_a_connect_fault() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(30))
        .rng_seed(11)
        .build();

    add_rendezvous(&mut sim);

    sim.client("peer", async {
        let node = start_node(3).await?;
        node.open_session().await?;

        let result = node.connect_to_peer(PeerAddress::new("ffffffffffffffff")).await;
        assert!(result.is_err());

        let status = node.status().await?;
        assert!(status.connections.is_empty());
        assert_eq!(status.faults.len(), 1);
        assert_eq!(status.faults[0].kind, FaultKind::HostConnectFailed);
        Ok(())
    });

    sim.run().unwrap();
}
