use std::sync::Arc;

use loadline_backend::{Backend, BackendConfig, BackendError, BackendServer, LocalBackend};
use loadline_types::api::{Credentials, MessageFilter, NewMessage, ProfileUpdate, SignUp};
use loadline_types::events::{AuthEvent, MESSAGES_TABLE};
use loadline_types::models::Message;
use uuid::Uuid;

const PASSWORD: &str = "correct-horse";

fn server() -> Arc<BackendServer> {
    BackendServer::open_in_memory(BackendConfig::default()).unwrap()
}

fn signup(email: &str, name: &str) -> SignUp {
    SignUp {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        name: name.to_string(),
        phone_number: Some("555-0100".into()),
        address: None,
    }
}

fn credentials(email: &str) -> Credentials {
    Credentials {
        email: email.to_string(),
        password: PASSWORD.to_string(),
    }
}

async fn signed_in(server: &Arc<BackendServer>, email: &str, name: &str) -> (LocalBackend, Uuid) {
    let client = server.connect();
    let user = client.sign_up(&signup(email, name)).await.unwrap();
    client.sign_in(&credentials(email)).await.unwrap();
    (client, user.id)
}

#[tokio::test]
async fn sign_up_creates_plain_profile_without_signing_in() {
    let server = server();
    let client = server.connect();

    let user = client.sign_up(&signup("Marta@Loadline.test", "Marta")).await.unwrap();
    assert_eq!(user.email, "marta@loadline.test");
    assert!(client.session().await.unwrap().is_none());

    client.sign_in(&credentials("marta@loadline.test")).await.unwrap();
    let profile = client.profile(user.id).await.unwrap().unwrap();
    assert_eq!(profile.name, "Marta");
    assert!(!profile.is_admin);
    assert_eq!(profile.phone_number.as_deref(), Some("555-0100"));
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let server = server();
    let client = server.connect();
    client.sign_up(&signup("a@loadline.test", "A")).await.unwrap();

    let err = client.sign_up(&signup("A@loadline.test", "Other")).await.unwrap_err();
    assert!(matches!(err, BackendError::Conflict(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sign_ups_for_one_email_conflict() {
    let server = server();
    let first = server.connect();
    let second = server.connect();

    let first_req = signup("race@loadline.test", "First");
    let second_req = signup("race@loadline.test", "Second");
    let (a, b) = tokio::join!(first.sign_up(&first_req), second.sign_up(&second_req),);
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(err, BackendError::Conflict(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let server = server();
    let client = server.connect();
    client.sign_up(&signup("a@loadline.test", "A")).await.unwrap();

    let err = client
        .sign_in(&Credentials {
            email: "a@loadline.test".into(),
            password: "not-the-password".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidCredentials));

    let err = client.sign_in(&credentials("nobody@loadline.test")).await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidCredentials));
}

#[tokio::test]
async fn auth_events_follow_sign_in_and_out() {
    let server = server();
    let client = server.connect();
    client.sign_up(&signup("a@loadline.test", "A")).await.unwrap();
    let mut events = client.auth_events();

    let session = client.sign_in(&credentials("a@loadline.test")).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn(session));

    client.sign_out().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    assert!(client.session().await.unwrap().is_none());
}

#[tokio::test]
async fn calls_without_session_are_unauthenticated() {
    let server = server();
    let client = server.connect();

    let err = client
        .select_messages(MessageFilter::Participant(Uuid::new_v4()), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Unauthenticated));
    assert!(matches!(
        client.subscribe(MESSAGES_TABLE).await.unwrap_err(),
        BackendError::Unauthenticated
    ));
}

#[tokio::test]
async fn messages_must_be_sent_as_session_user() {
    let server = server();
    let (client, _me) = signed_in(&server, "a@loadline.test", "A").await;

    let err = client
        .insert_message(&NewMessage {
            sender_id: Uuid::new_v4(),
            receiver_id: None,
            content: "spoofed".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Forbidden(_)));
}

#[tokio::test]
async fn users_cannot_read_other_threads_but_admin_can() {
    let server = server();
    let admin_id = server
        .provision_admin("dispatch@loadline.test", PASSWORD, "Dispatch")
        .await
        .unwrap();
    let (a, a_id) = signed_in(&server, "a@loadline.test", "A").await;
    let (_b, b_id) = signed_in(&server, "b@loadline.test", "B").await;

    a.insert_message(&NewMessage {
        sender_id: a_id,
        receiver_id: None,
        content: "  trailer 7 loaded  ".into(),
    })
    .await
    .unwrap();

    let err = a
        .select_messages(MessageFilter::Participant(b_id), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Forbidden(_)));

    let admin = server.connect();
    admin.sign_in(&credentials("dispatch@loadline.test")).await.unwrap();
    let thread = admin
        .select_messages(MessageFilter::Participant(a_id), 10)
        .await
        .unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].content, "trailer 7 loaded");
    assert_eq!(thread[0].sender_name.as_deref(), Some("A"));
    assert_eq!(thread[0].receiver_id, None);

    let senders = admin
        .distinct_senders(MessageFilter::AddressedTo {
            receiver: admin_id,
            include_unaddressed: true,
        })
        .await
        .unwrap();
    assert_eq!(senders, vec![a_id]);
}

#[tokio::test]
async fn provisioning_is_idempotent_and_never_promotes() {
    let server = server();
    let first = server
        .provision_admin("dispatch@loadline.test", PASSWORD, "Dispatch")
        .await
        .unwrap();
    let again = server
        .provision_admin("dispatch@loadline.test", PASSWORD, "Dispatch")
        .await
        .unwrap();
    assert_eq!(first, again);

    let client = server.connect();
    client.sign_up(&signup("a@loadline.test", "A")).await.unwrap();
    let err = server
        .provision_admin("a@loadline.test", PASSWORD, "A")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Conflict(_)));
}

#[tokio::test]
async fn profile_updates_are_owner_only() {
    let server = server();
    let (a, a_id) = signed_in(&server, "a@loadline.test", "A").await;
    let (_b, b_id) = signed_in(&server, "b@loadline.test", "B").await;

    let update = ProfileUpdate {
        address: Some("12 Depot Rd".into()),
        ..Default::default()
    };
    let profile = a.update_profile(a_id, &update).await.unwrap();
    assert_eq!(profile.address.as_deref(), Some("12 Depot Rd"));
    assert_eq!(profile.name, "A");

    let err = a.update_profile(b_id, &update).await.unwrap_err();
    assert!(matches!(err, BackendError::Forbidden(_)));
}

#[tokio::test]
async fn inserts_are_pushed_to_every_subscriber() {
    let server = server();
    let (a, a_id) = signed_in(&server, "a@loadline.test", "A").await;
    let (b, _b_id) = signed_in(&server, "b@loadline.test", "B").await;

    let mut a_rx = a.subscribe(MESSAGES_TABLE).await.unwrap();
    let mut b_rx = b.subscribe(MESSAGES_TABLE).await.unwrap();

    let sent = a
        .insert_message(&NewMessage {
            sender_id: a_id,
            receiver_id: None,
            content: "at the dock".into(),
        })
        .await
        .unwrap();

    for rx in [&mut a_rx, &mut b_rx] {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.table, MESSAGES_TABLE);
        let record: Message = serde_json::from_value(event.record).unwrap();
        assert_eq!(record, sent);
    }
}

#[tokio::test]
async fn interrupt_and_close_end_subscriptions() {
    let server = server();
    let (a, _) = signed_in(&server, "a@loadline.test", "A").await;

    let mut rx = a.subscribe(MESSAGES_TABLE).await.unwrap();
    a.interrupt_realtime();
    assert!(rx.recv().await.is_none());

    let mut rx = a.subscribe(MESSAGES_TABLE).await.unwrap();
    a.close().await;
    assert!(rx.recv().await.is_none());
    assert!(matches!(a.session().await.unwrap_err(), BackendError::Closed));
}
