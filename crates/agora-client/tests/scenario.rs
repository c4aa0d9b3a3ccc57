//! End-to-end flows between several clients sharing one graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_client::{
    voice_channel_path, Client, ClientConfig, ClientError, KeyAgreement, LiveView, MediaBackend,
    Session, X25519Agreement,
};
use agora_graph::{link, spawn_graph, Graph, GraphConfig};
use agora_media::loopback::{LoopbackConnector, LoopbackDevices};
use agora_media::{LinkPhase, MediaError};
use agora_shared::constants::{DEFAULT_TEXT_CHANNEL, DEFAULT_VOICE_CHANNEL, MAX_AVATAR_BYTES};
use agora_shared::crypto::SymmetricKey;
use agora_shared::{paths, ChannelId, EncryptionPub, UserPub};
use serde_json::Value;
use x25519_dalek::StaticSecret;

const PASSWORD: &str = "correct horse battery";

fn config() -> ClientConfig {
    ClientConfig {
        lookup_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

fn client(graph: &Graph) -> Client {
    Client::new(graph.clone(), config(), MediaBackend::loopback())
}

async fn register(graph: &Graph, alias: &str) -> (Client, Arc<Session>) {
    let client = client(graph);
    let registration = client.register(alias, PASSWORD).await.unwrap();
    (client, registration.session)
}

/// Receive snapshots until one satisfies `done`.
async fn until<T, F>(view: &mut LiveView<T>, done: F) -> T
where
    T: Send + 'static,
    F: Fn(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let item = view.recv().await.expect("listener stopped");
            if done(&item) {
                return item;
            }
        }
    })
    .await
    .expect("condition not reached in time")
}

#[tokio::test]
async fn direct_message_reaches_recipient() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    alice.send_dm(&bob.pub_key(), "hello").await.unwrap();

    let mut inbox = bob.listen_dms(&alice.pub_key()).await.unwrap();
    let messages = until(&mut inbox, |m| !m.is_empty()).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[0].from, alice.pub_key());
    assert_eq!(messages[0].from_alias, "alice");
    assert!(messages[0].verified);
}

#[tokio::test]
async fn direct_messages_sync_across_replicas() {
    let left = spawn_graph(GraphConfig::default()).unwrap();
    let right = spawn_graph(GraphConfig::default()).unwrap();
    let _link = link(&left, &right);

    let (_a, alice) = register(&left, "alice").await;
    let (_b, bob) = register(&right, "bob").await;

    alice.send_dm(&bob.pub_key(), "over the wire").await.unwrap();
    let mut inbox = bob.listen_dms(&alice.pub_key()).await.unwrap();
    let messages = until(&mut inbox, |m| !m.is_empty()).await;
    assert_eq!(messages[0].text, "over the wire");
}

#[tokio::test]
async fn accepted_friend_request_is_mutual() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    alice.send_friend_request(&bob.pub_key()).unwrap();
    let mut requests = bob.listen_friend_requests().unwrap();
    let pending = until(&mut requests, |r| !r.is_empty()).await;
    assert_eq!(pending[0].from, alice.pub_key());

    let mut alice_friends = alice.listen_friends().unwrap();
    bob.accept_friend_request(&alice.pub_key()).await.unwrap();

    let mut bob_friends = bob.listen_friends().unwrap();
    let listed = until(&mut bob_friends, |f| !f.is_empty()).await;
    assert_eq!(listed[0].pub_key, alice.pub_key());
    assert_eq!(listed[0].alias, "alice");

    let listed = until(&mut alice_friends, |f| !f.is_empty()).await;
    assert_eq!(listed[0].pub_key, bob.pub_key());
    assert_eq!(listed[0].alias, "bob");

    until(&mut requests, |r| r.is_empty()).await;
}

async fn befriend(alice: &Session, bob: &Session) {
    let mut alice_friends = alice.listen_friends().unwrap();
    alice.send_friend_request(&bob.pub_key()).unwrap();
    let mut requests = bob.listen_friend_requests().unwrap();
    until(&mut requests, |r| !r.is_empty()).await;
    bob.accept_friend_request(&alice.pub_key()).await.unwrap();
    until(&mut alice_friends, |f| !f.is_empty()).await;
}

#[tokio::test]
async fn removed_friend_is_not_adopted_again() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;
    befriend(&alice, &bob).await;

    let mut alice_friends = alice.listen_friends().unwrap();
    until(&mut alice_friends, |f| f.len() == 1).await;
    alice.remove_friend(&bob.pub_key()).unwrap();
    until(&mut alice_friends, |f| f.is_empty()).await;

    // Give a stale listener time to re-adopt before checking.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let absent = Duration::from_millis(50);
    let entries = [
        paths::friend(&alice.pub_key(), &bob.pub_key()),
        paths::friend_mirror(&alice.pub_key(), &bob.pub_key()),
        paths::friend_mirror(&bob.pub_key(), &alice.pub_key()),
    ];
    for entry in &entries {
        assert_eq!(graph.once(entry, absent).await, None, "{entry} still present");
    }
}

#[tokio::test]
async fn rejected_request_leaves_the_inbox() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    alice.send_friend_request(&bob.pub_key()).unwrap();
    let mut requests = bob.listen_friend_requests().unwrap();
    until(&mut requests, |r| r.len() == 1).await;

    bob.reject_friend_request(&alice.pub_key()).unwrap();
    until(&mut requests, |r| r.is_empty()).await;

    let request = paths::friend_request(&bob.pub_key(), &alice.pub_key());
    assert_eq!(graph.once(&request, Duration::from_millis(50)).await, None);
    let friend = paths::friend(&bob.pub_key(), &alice.pub_key());
    assert_eq!(graph.once(&friend, Duration::from_millis(50)).await, None);
}

#[tokio::test]
async fn profile_avatar_reaches_other_users() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    let first = "data:image/png;base64,AAAA";
    let second = "data:image/png;base64,BBBB";
    let mut avatar = bob.listen_avatar(&alice.pub_key()).unwrap();
    alice.set_profile_avatar(first).unwrap();
    assert_eq!(until(&mut avatar, |url| url == first).await, first);

    // Values that are not images never reach the listener.
    let script = Value::String("javascript:alert(1)".into());
    graph.put(&paths::avatar(&alice.pub_key()), script);
    alice.set_profile_avatar(second).unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), avatar.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next, second);

    let mut mine = alice.listen_my_avatar().unwrap();
    assert_eq!(until(&mut mine, |url| url == second).await, second);

    assert!(matches!(
        alice.set_profile_avatar("https://example.com/me.png"),
        Err(ClientError::InvalidAvatar)
    ));
    let oversized = format!("data:image/png;base64,{}", "A".repeat(MAX_AVATAR_BYTES));
    assert!(matches!(
        alice.set_profile_avatar(&oversized),
        Err(ClientError::AvatarTooLarge(_, MAX_AVATAR_BYTES))
    ));
}

#[tokio::test]
async fn only_the_owner_sets_the_server_avatar() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    let server = alice.create_server("Guild").await.unwrap();
    bob.join_server(&server).await.unwrap();
    let picture = "data:image/png;base64,CCCC";

    assert!(matches!(
        bob.set_server_avatar(&server, picture).await,
        Err(ClientError::NotServerOwner)
    ));
    assert!(matches!(
        alice.set_server_avatar(&server, "not an image").await,
        Err(ClientError::InvalidAvatar)
    ));
    assert_eq!(
        graph.once(&paths::server_avatar(&server), Duration::from_millis(50)).await,
        None
    );

    let mut avatar = bob.listen_server_avatar(&server).unwrap();
    alice.set_server_avatar(&server, picture).await.unwrap();
    assert_eq!(until(&mut avatar, |url| url == picture).await, picture);
}

#[tokio::test]
async fn lookup_of_unknown_user_times_out() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    let found = alice.lookup_user(&bob.pub_key()).await.unwrap();
    assert_eq!(found.alias, "bob");

    assert!(matches!(
        alice.lookup_user(&UserPub([9; 32])).await,
        Err(ClientError::LookupTimeout(_))
    ));
}

#[tokio::test]
async fn banned_member_is_hidden_and_cannot_rejoin() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    let server = alice.create_server("Guild").await.unwrap();
    bob.join_server(&server).await.unwrap();

    let mut members = alice.listen_server_members(&server).unwrap();
    until(&mut members, |m| m.len() == 2).await;

    assert!(matches!(
        bob.ban_server_member(&server, &alice.pub_key()).await,
        Err(ClientError::NotServerOwner)
    ));
    assert!(matches!(
        alice.ban_server_member(&server, &alice.pub_key()).await,
        Err(ClientError::CannotBanOwner)
    ));

    alice.ban_server_member(&server, &bob.pub_key()).await.unwrap();
    let remaining = until(&mut members, |m| m.len() == 1).await;
    assert_eq!(remaining[0].pub_key, alice.pub_key());

    assert!(bob.is_banned(&server).await.unwrap());
    assert!(matches!(bob.join_server(&server).await, Err(ClientError::Banned)));
}

#[tokio::test]
async fn server_members_share_the_channel_key() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    let server = alice.create_server("Guild").await.unwrap();
    bob.join_server(&server).await.unwrap();

    let mut servers = bob.listen_user_servers().unwrap();
    let joined = until(&mut servers, |s| s.len() == 1 && s[0].channels.len() == 2).await;
    assert_eq!(joined[0].name, "Guild");
    assert_eq!(joined[0].owner, Some(alice.pub_key()));
    assert_ne!(joined[0].encryption_key, server.to_string());

    let general = ChannelId::from(DEFAULT_TEXT_CHANNEL);
    alice
        .send_server_message(&server, &general, "welcome")
        .await
        .unwrap();
    let mut channel = bob.listen_server_messages(&server, &general).await.unwrap();
    let messages = until(&mut channel, |m| !m.is_empty()).await;
    assert_eq!(messages[0].text, "welcome");
    assert!(messages[0].verified);
}

#[tokio::test]
async fn group_invite_is_accepted_and_messages_are_readable() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    let mut invites = bob.listen_group_invites().unwrap();
    let group = alice.create_group("Crew", &[bob.pub_key()]).await.unwrap();

    let invite = tokio::time::timeout(Duration::from_secs(5), invites.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invite.id, group);
    assert_eq!(invite.from, alice.pub_key());

    let mut groups = bob.listen_user_groups().unwrap();
    let listed = until(&mut groups, |g| g.len() == 1 && g[0].members.len() == 2).await;
    assert_eq!(listed[0].name, "Crew");

    alice.send_group_message(&group, "hi crew").await.unwrap();
    let mut messages = bob.listen_group_messages(&group).await.unwrap();
    let received = until(&mut messages, |m| !m.is_empty()).await;
    assert_eq!(received[0].text, "hi crew");
    assert_eq!(received[0].from, alice.pub_key());
}

struct CountingAgreement(AtomicUsize);

impl KeyAgreement for CountingAgreement {
    fn agree(&self, own: &StaticSecret, peer: &EncryptionPub) -> SymmetricKey {
        self.0.fetch_add(1, Ordering::SeqCst);
        X25519Agreement.agree(own, peer)
    }
}

#[tokio::test]
async fn pairwise_secret_is_derived_once_per_peer() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let counter = Arc::new(CountingAgreement(AtomicUsize::new(0)));
    let alice_client = client(&graph).with_key_agreement(counter.clone());
    let alice = alice_client.register("alice", PASSWORD).await.unwrap().session;
    let (_b, bob) = register(&graph, "bob").await;

    for text in ["one", "two", "three"] {
        alice.send_dm(&bob.pub_key(), text).await.unwrap();
    }
    let _view = alice.listen_dms(&bob.pub_key()).await.unwrap();

    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(alice.cached_secrets(), 1);
}

#[tokio::test]
async fn recovery_phrase_restores_the_same_account() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let first = client(&graph);
    let registration = first.register("carol", PASSWORD).await.unwrap();
    first.logout().await;

    let second = client(&graph);
    let restored = second
        .restore_from_recovery_phrase("carol", &registration.recovery_phrase)
        .await
        .unwrap();
    assert_eq!(restored.pub_key(), registration.pub_key);
    assert_eq!(restored.alias(), "carol");

    assert!(matches!(
        second.restore_from_recovery_phrase("carol", "not a phrase").await,
        Err(ClientError::InvalidMnemonic)
    ));
}

#[tokio::test]
async fn recovery_phrase_for_another_account_is_not_found() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_c, _carol) = register(&graph, "carol").await;
    let erin_client = client(&graph);
    let erin = erin_client.register("erin", PASSWORD).await.unwrap();
    erin_client.logout().await;

    let restoring = client(&graph);
    assert!(matches!(
        restoring
            .restore_from_recovery_phrase("nobody", &erin.recovery_phrase)
            .await,
        Err(ClientError::AccountNotFound)
    ));
    assert!(matches!(
        restoring
            .restore_from_recovery_phrase("carol", &erin.recovery_phrase)
            .await,
        Err(ClientError::AccountNotFound)
    ));
    assert!(!restoring.is_authenticated());
}

#[tokio::test]
async fn login_checks_credentials() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (first, _) = register(&graph, "dave").await;
    first.logout().await;

    let second = client(&graph);
    assert!(matches!(
        second.login("dave", "wrong password here").await,
        Err(ClientError::WrongCredentials)
    ));
    assert!(!second.is_authenticated());

    let session = second.login("dave", PASSWORD).await.unwrap();
    assert_eq!(session.alias(), "dave");

    assert!(matches!(
        client(&graph).register("dave", PASSWORD).await,
        Err(ClientError::AliasTaken)
    ));
    assert!(matches!(
        client(&graph).register("erin", "short").await,
        Err(ClientError::WeakPassword(_))
    ));
}

#[tokio::test]
async fn voice_call_links_two_participants() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_a, alice) = register(&graph, "alice").await;
    let (_b, bob) = register(&graph, "bob").await;

    let server = alice.create_server("Guild").await.unwrap();
    let channel = voice_channel_path(&server, &ChannelId::from(DEFAULT_VOICE_CHANNEL));

    let mut occupants = alice.listen_voice_channel_peers(&channel).unwrap();
    let mut alice_peers = alice.join_voice_channel(&channel).await.unwrap();
    let _bob_peers = bob.join_voice_channel(&channel).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let peers = alice_peers.borrow_and_update();
                if peers.len() == 1 && peers[0].phase == LinkPhase::Connected {
                    assert_eq!(peers[0].pub_key, bob.pub_key());
                    break;
                }
            }
            alice_peers.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let present = until(&mut occupants, |o| o.len() == 2).await;
    assert!(present.iter().any(|o| o.alias == "bob"));

    assert!(alice.toggle_mute().await.unwrap());
    assert_eq!(alice.voice_channel().await.as_deref(), Some(channel.as_str()));

    alice.leave_voice_channel().await;
    assert!(alice_peers.borrow().is_empty());
    assert_eq!(alice.voice_channel().await, None);
    assert!(matches!(alice.toggle_mute().await, Err(ClientError::NotInVoiceChannel)));
}

#[tokio::test]
async fn logout_closes_the_session() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (client, session) = register(&graph, "frank").await;
    let mut friends = session.listen_friends().unwrap();
    assert!(session.holds_keys());

    client.logout().await;

    assert!(!session.is_open());
    assert!(!session.holds_keys());
    assert!(!client.is_authenticated());
    assert!(matches!(client.session(), Err(ClientError::NotAuthenticated)));
    assert!(matches!(
        session.send_dm(&session.pub_key(), "anyone?").await,
        Err(ClientError::NotAuthenticated)
    ));
    let stopped = tokio::time::timeout(Duration::from_secs(1), async {
        while friends.recv().await.is_some() {}
    })
    .await;
    assert!(stopped.is_ok());
}

/// A client whose screen capture prompt is never answered.
async fn join_with_open_prompt(graph: &Graph, alias: &str) -> (Client, Arc<Session>) {
    let media = MediaBackend::new(
        LoopbackDevices::unanswered_display(),
        Arc::new(LoopbackConnector::new()),
    );
    let client = Client::new(graph.clone(), config(), media);
    let session = client.register(alias, PASSWORD).await.unwrap().session;
    let server = session.create_server("Guild").await.unwrap();
    let channel = voice_channel_path(&server, &ChannelId::from(DEFAULT_VOICE_CHANNEL));
    session.join_voice_channel(&channel).await.unwrap();
    (client, session)
}

fn share_screen(session: &Arc<Session>) -> tokio::task::JoinHandle<agora_client::Result<()>> {
    let session = session.clone();
    tokio::spawn(async move { session.start_screen_share(None).await })
}

#[tokio::test]
async fn logout_cancels_a_pending_screen_share() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (client, session) = join_with_open_prompt(&graph, "grace").await;

    let sharing = share_screen(&session);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sharing.is_finished());

    tokio::time::timeout(Duration::from_secs(1), client.logout())
        .await
        .expect("logout does not wait for the capture prompt");
    let result = tokio::time::timeout(Duration::from_secs(1), sharing)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ClientError::Media(MediaError::Cancelled))));
    assert_eq!(session.voice_channel().await, None);
}

#[tokio::test]
async fn leaving_cancels_a_pending_screen_share() {
    let graph = spawn_graph(GraphConfig::default()).unwrap();
    let (_client, session) = join_with_open_prompt(&graph, "heidi").await;

    let sharing = share_screen(&session);
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), session.leave_voice_channel())
        .await
        .expect("leave does not wait for the capture prompt");
    let result = tokio::time::timeout(Duration::from_secs(1), sharing)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ClientError::Media(MediaError::Cancelled))));
    assert!(session.is_open());
}
