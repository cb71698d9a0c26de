//! Session behaviour over real sockets, with the scriptable engine.

use std::{collections::BTreeSet, time::Duration};

use serde_json::{json, Value};
use simcast_client::{CylinderShape, Rejected};
use simcast_server::{
    error::EngineOp,
    fake::{FakeControls, FakeEngine},
};
use simcast_shared::{
    command::{Command, CreateCylinder},
    config::{AnchorMode, ServerConfig},
    math::Vec3,
    net::{BodyId, Reply},
};
use simcast_tests::TestStack;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const WAIT: Duration = Duration::from_secs(5);

/// Scheduling slack on top of one broadcast period.
const CADENCE_MARGIN: Duration = Duration::from_millis(25);

async fn fake_stack() -> anyhow::Result<(TestStack<FakeEngine>, FakeControls)> {
    fake_stack_with(ServerConfig::default()).await
}

async fn fake_stack_with(
    cfg: ServerConfig,
) -> anyhow::Result<(TestStack<FakeEngine>, FakeControls)> {
    let engine = FakeEngine::default();
    let controls = engine.controls();
    let stack = TestStack::start(engine, cfg).await?;
    Ok((stack, controls))
}

fn rejected_kind(err: anyhow::Error) -> String {
    match err.downcast::<Rejected>() {
        Ok(r) => r.error,
        Err(e) => panic!("expected rejection, got {e:#}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creators_get_dense_ids() -> anyhow::Result<()> {
    let (stack, _) = fake_stack().await?;

    let mut tasks = Vec::new();
    for i in 0..3 {
        let mut client = stack.connect().await?;
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for j in 0..5 {
                let shape = CylinderShape::new().position(Vec3::new(i as f32, j as f32, 1.0));
                ids.push(client.create_cylinder(shape.build()).await?);
            }
            Ok::<_, anyhow::Error>(ids)
        }));
    }

    let mut all = BTreeSet::new();
    for task in tasks {
        let ids = task.await??;
        // One sender's ids are increasing.
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "{ids:?}");
        all.extend(ids);
    }
    let expected: BTreeSet<_> = (0..15).map(BodyId).collect();
    assert_eq!(all, expected);
    assert_eq!(stack.world.len(), 15);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_command_is_rejected_and_session_continues() -> anyhow::Result<()> {
    let (stack, _) = fake_stack().await?;
    let mut client = stack.connect().await?;

    let bad = CreateCylinder {
        height: -1.0,
        ..CylinderShape::new().build()
    };
    let err = client.create_cylinder(bad).await.unwrap_err();
    assert_eq!(rejected_kind(err), "non_positive");
    assert_eq!(stack.world.len(), 0);

    let id = client.create_cylinder(CylinderShape::new().build()).await?;
    assert_eq!(id, BodyId(0));
    assert_eq!(stack.world.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_and_malformed_commands_get_error_replies() -> anyhow::Result<()> {
    let (stack, _) = fake_stack().await?;
    let mut client = stack.connect().await?;

    client.send(&json!({"type": "sphere", "radius": 1})).await?;
    match client.next_reply(WAIT).await? {
        Reply::Error { error, message } => {
            assert_eq!(error, "unknown_command");
            assert!(message.contains("sphere"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }

    client.send(&json!({"type": "cylinder", "height": 2})).await?;
    match client.next_reply(WAIT).await? {
        Reply::Error { error, .. } => assert_eq!(error, "malformed_payload"),
        other => panic!("unexpected {other:?}"),
    }

    // Not JSON at all.
    let mut raw = stack.connect_raw().await?;
    raw.write_all(&5u32.to_be_bytes()).await?;
    raw.write_all(b"hello").await?;
    let mut len = [0u8; 4];
    tokio::time::timeout(WAIT, raw.read_exact(&mut len)).await??;
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    raw.read_exact(&mut body).await?;
    let reply: Value = serde_json::from_slice(&body)?;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["error"], "malformed_payload");

    assert_eq!(stack.world.len(), 0);
    stack.wait_for_sessions(2).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_session_sees_every_body() -> anyhow::Result<()> {
    let (stack, _) = fake_stack_with(ServerConfig {
        anchor: AnchorMode::Free,
        ..ServerConfig::default()
    })
    .await?;
    let mut a = stack.connect().await?;
    let mut b = stack.connect().await?;

    let id = a
        .create_cylinder(CylinderShape::new().position(Vec3::new(0.0, 0.0, 5.0)).build())
        .await?;

    // B hears about A's body within one broadcast period.
    b.poll(stack.cfg.broadcast_interval() + CADENCE_MARGIN).await?;
    assert!(b.transforms.get(id).is_some(), "b never saw {id}");

    // A free body keeps falling in B's view.
    b.poll(Duration::from_millis(300)).await?;
    let seen = b
        .transforms
        .get(id)
        .ok_or_else(|| anyhow::anyhow!("b lost {id}"))?;
    assert!(seen.position.z < 5.0, "z = {}", seen.position.z);
    assert!(b.transforms.previous(id).is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_pose_is_skipped_not_fatal() -> anyhow::Result<()> {
    let (stack, controls) = fake_stack().await?;
    let mut client = stack.connect().await?;

    controls.fail_pose(0, true);
    let first = client.create_cylinder(CylinderShape::new().build()).await?;
    let second = client.create_cylinder(CylinderShape::new().build()).await?;

    client.poll(Duration::from_millis(300)).await?;
    assert!(client.transforms.get(first).is_none());
    assert!(client.transforms.get(second).is_some());

    controls.fail_pose(0, false);
    client.poll(Duration::from_millis(300)).await?;
    assert!(client.transforms.get(first).is_some());
    assert!(stack.clock_running());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_one_session_leaves_the_rest_running() -> anyhow::Result<()> {
    let (stack, _) = fake_stack().await?;
    let mut a = stack.connect().await?;
    let mut b = stack.connect().await?;
    a.create_cylinder(CylinderShape::new().build()).await?;
    stack.wait_for_sessions(2).await?;

    a.disconnect().await?;
    stack.wait_for_sessions(1).await?;

    let ticks = stack.world.ticks();
    let received = b.poll(Duration::from_millis(300)).await?;
    assert!(received > 0);
    assert!(stack.world.ticks() > ticks);
    assert!(stack.clock_running());

    // Dropping the socket without a disconnect command also closes cleanly.
    drop(b);
    stack.wait_for_sessions(0).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_frame_closes_only_that_session() -> anyhow::Result<()> {
    let (stack, _) = fake_stack().await?;
    let mut healthy = stack.connect().await?;

    let mut raw = stack.connect_raw().await?;
    stack.wait_for_sessions(2).await?;
    let too_big = (stack.cfg.max_frame_len + 1) as u32;
    raw.write_all(&too_big.to_be_bytes()).await?;

    let mut buf = [0u8; 16];
    let res = tokio::time::timeout(WAIT, raw.read(&mut buf)).await?;
    assert!(matches!(res, Ok(0) | Err(_)), "{res:?}");
    stack.wait_for_sessions(1).await?;

    assert_eq!(
        healthy.create_cylinder(CylinderShape::new().build()).await?,
        BodyId(0)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_command_ends_the_session() -> anyhow::Result<()> {
    let (stack, _) = fake_stack().await?;
    let mut client = stack.connect().await?;
    stack.wait_for_sessions(1).await?;

    client.send_command(&Command::Disconnect).await?;
    let closed = loop {
        match client.recv_timeout(WAIT).await {
            Ok(Some(_)) => continue,
            Ok(None) => break false,
            Err(_) => break true,
        }
    };
    assert!(closed, "server kept the session open");
    stack.wait_for_sessions(0).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_creation_is_fatal() -> anyhow::Result<()> {
    let (mut stack, controls) = fake_stack().await?;
    let mut client = stack.connect().await?;

    controls.fail_create(true);
    assert!(client.create_cylinder(CylinderShape::new().build()).await.is_err());

    let err = tokio::time::timeout(WAIT, stack.fatal_rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("fatal channel closed"))?;
    assert_eq!(err.op, EngineOp::CreateBody);
    assert_eq!(stack.world.len(), 0);
    stack.wait_for_sessions(0).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_step_stops_the_clock() -> anyhow::Result<()> {
    let (mut stack, controls) = fake_stack().await?;
    controls.fail_step(true);

    let err = tokio::time::timeout(WAIT, stack.fatal_rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("fatal channel closed"))?;
    assert_eq!(err.op, EngineOp::Step);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stack.clock_running());
    Ok(())
}
