#![allow(clippy::unwrap_used)]
//! Mailroom against a real local WebSocket push server.

use std::sync::Arc;
use std::time::Duration;

use huddle_core::fakes::FakeMailboxApi;
use huddle_core::{
    AgentInfo, DashboardData, MailboxApi, Message, MessageStatus, Severity, StoreChange,
};
use huddle_ipc::{
    ClientMessage, ConnectionState, PushServer, ReconnectPolicy, ServerMessage, Transport,
    WsTransport,
};
use huddle_sync::{Mailroom, MailroomEvent, MailroomOptions, ToastKind};

fn state_sync(messages: Vec<Message>) -> ServerMessage {
    ServerMessage::StateSync(DashboardData {
        agents: vec![AgentInfo::new("qa"), AgentInfo::new("coordinator")],
        messages,
        ..DashboardData::default()
    })
}

fn m1() -> Message {
    Message::new("m1", "qa", "coordinator", "2025-01-01T00:00:00").with_subject("Flaky test")
}

fn m2() -> Message {
    Message::new("m2", "coordinator", "qa", "2025-01-02T00:00:00")
        .with_thread("m1")
        .replying_to("m1")
        .with_status(MessageStatus::Resolved)
        .with_severity(Severity::Major)
}

fn mailroom(server: &PushServer, api: &Arc<FakeMailboxApi>, options: MailroomOptions) -> Mailroom {
    let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(server.url()));
    Mailroom::new(transport, Arc::clone(api) as Arc<dyn MailboxApi>, options)
}

async fn next(mailroom: &mut Mailroom) -> MailroomEvent {
    tokio::time::timeout(Duration::from_secs(5), mailroom.next_event())
        .await
        .expect("timed out waiting for a mailroom event")
        .unwrap()
}

#[tokio::test]
async fn optimistic_edit_converges_after_failed_request() {
    let server = PushServer::bind("127.0.0.1:0").await.unwrap();
    let api = Arc::new(FakeMailboxApi::failing());
    let mut mailroom = mailroom(&server, &api, MailroomOptions::default());

    let server_task = tokio::spawn(async move {
        let mut conn = server.accept().await.unwrap();
        conn.send(&state_sync(vec![m1()])).await.unwrap();
        conn.send(&ServerMessage::MessageAdded(m2())).await.unwrap();
        conn.send(&ServerMessage::MessageAdded(m2())).await.unwrap();
        conn.send_raw("{\"type\":\"message_added\"").await.unwrap();

        assert_eq!(conn.recv().await.unwrap(), Some(ClientMessage::RequestSync));
        conn.send(&state_sync(vec![m2(), m1()])).await.unwrap();
        while let Ok(Some(_)) = conn.recv().await {}
    });

    mailroom.connect();
    assert_eq!(next(&mut mailroom).await, MailroomEvent::Connected);
    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::Synced { messages: 1 }
    );
    let thread = mailroom.threads()[0].clone();
    assert_eq!(thread.id(), "m1");
    assert!(thread.has_open());
    assert_eq!(thread.worst_severity(), None);

    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::MessageChanged {
            id: "m2".into(),
            change: StoreChange::Inserted,
        }
    );
    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::MessageChanged {
            id: "m2".into(),
            change: StoreChange::Unchanged,
        }
    );
    let thread = mailroom.threads()[0].clone();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread.latest().id, "m2");
    assert!(thread.has_open());
    assert_eq!(thread.worst_severity(), Some(Severity::Major));

    mailroom.set_status("m1", MessageStatus::Resolved).unwrap();
    assert!(!mailroom.threads()[0].has_open());

    let MailroomEvent::Settled { error, .. } = next(&mut mailroom).await else {
        panic!("expected settlement");
    };
    assert!(error.is_some());
    assert!(!mailroom.threads()[0].has_open());

    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::Synced { messages: 2 }
    );
    assert!(mailroom.threads()[0].has_open());
    assert_eq!(mailroom.connection_state(), ConnectionState::Connected);

    mailroom.disconnect();
    server_task.await.unwrap();
}

#[tokio::test]
async fn merge_lands_after_resync() {
    let server = PushServer::bind("127.0.0.1:0").await.unwrap();
    let api = Arc::new(FakeMailboxApi::new());
    let mut mailroom = mailroom(&server, &api, MailroomOptions::default());
    let drift =
        Message::new("b1", "physics", "qa", "2025-01-03T00:00:00").with_subject("Ball drift");

    let server_task = tokio::spawn({
        let drift = drift.clone();
        async move {
            let mut conn = server.accept().await.unwrap();
            conn.send(&state_sync(vec![drift.clone(), m2(), m1()]))
                .await
                .unwrap();

            assert_eq!(conn.recv().await.unwrap(), Some(ClientMessage::RequestSync));
            let merged = drift.with_thread("m1").replying_to("m2");
            conn.send(&state_sync(vec![merged, m2(), m1()]))
                .await
                .unwrap();
            while let Ok(Some(_)) = conn.recv().await {}
        }
    });

    mailroom.connect();
    assert_eq!(next(&mut mailroom).await, MailroomEvent::Connected);
    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::Synced { messages: 3 }
    );
    assert_eq!(mailroom.threads().len(), 2);

    mailroom.merge_threads("b1", "m1").unwrap();
    assert_eq!(mailroom.threads().len(), 2);

    let MailroomEvent::Settled { error: None, .. } = next(&mut mailroom).await else {
        panic!("expected successful settlement");
    };
    let MailroomEvent::Toast(toast) = next(&mut mailroom).await else {
        panic!("expected toast");
    };
    assert_eq!(toast.kind, ToastKind::Success);
    assert_eq!(toast.text, "Merged \"Ball drift\" into \"Flaky test\"");

    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::Synced { messages: 3 }
    );
    let threads = mailroom.threads();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id(), "m1");
    assert_eq!(threads[0].latest().id, "b1");

    mailroom.disconnect();
    server_task.await.unwrap();
}

#[tokio::test]
async fn reconnects_and_resyncs_after_server_drop() {
    let server = PushServer::bind("127.0.0.1:0").await.unwrap();
    let api = Arc::new(FakeMailboxApi::new());
    let options = MailroomOptions {
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(50)),
        ..MailroomOptions::default()
    };
    let mut mailroom = mailroom(&server, &api, options);

    let server_task = tokio::spawn(async move {
        let mut first = server.accept().await.unwrap();
        first.send(&state_sync(vec![m1()])).await.unwrap();
        first.close().await;
        drop(first);

        let mut second = server.accept().await.unwrap();
        second.send(&state_sync(vec![m2(), m1()])).await.unwrap();
        while let Ok(Some(_)) = second.recv().await {}
    });

    mailroom.connect();
    assert_eq!(next(&mut mailroom).await, MailroomEvent::Connected);
    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::Synced { messages: 1 }
    );

    let MailroomEvent::Offline { retry_in, .. } = next(&mut mailroom).await else {
        panic!("expected offline");
    };
    assert_eq!(retry_in, Duration::from_millis(50));

    assert_eq!(next(&mut mailroom).await, MailroomEvent::Connected);
    assert_eq!(
        next(&mut mailroom).await,
        MailroomEvent::Synced { messages: 2 }
    );

    mailroom.disconnect();
    assert_eq!(mailroom.connection_state(), ConnectionState::Disconnected);
    server_task.await.unwrap();
}
