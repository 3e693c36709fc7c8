//! End-to-end chat behaviour over real TLS connections.

mod common;

use common::start_server;
use common::start_server_with_filter;
use tlschat::dispatch::{CLIENT_HELP, MISSING_MESSAGE, UNKNOWN_COMMAND};

#[tokio::test]
async fn join_is_announced_and_listed() {
    let server = start_server().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    assert_eq!(alice.recv().await, "bob has connected.");

    bob.send("/users").await;
    assert_eq!(bob.recv().await, "Clients: alice, bob.");
    alice.send("/u").await;
    assert_eq!(alice.recv().await, "Clients: alice, bob.");

    assert!(server
        .console
        .lock()
        .iter()
        .any(|l| l.starts_with("Client named: 127.0.0.1:") && l.ends_with(" | alice")));
}

#[tokio::test]
async fn unnamed_session_is_listed_as_anonymous() {
    let server = start_server().await;
    let mut anon = server.connect().await;
    anon.send("/users").await;
    assert_eq!(anon.recv().await, "Clients: anonymous.");

    let mut alice = server.join("alice").await;
    alice.send("/users").await;
    assert_eq!(alice.recv().await, "Clients: anonymous, alice.");
}

#[tokio::test]
async fn chat_fans_out_to_everyone_but_sender() {
    let server = start_server_with_filter(Some(vec!["darn".to_string()])).await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    let mut carol = server.join("carol").await;
    assert_eq!(alice.recv().await, "bob has connected.");
    assert_eq!(alice.recv().await, "carol has connected.");
    assert_eq!(bob.recv().await, "carol has connected.");

    alice.send("well darn it").await;
    assert_eq!(bob.recv().await, "alice: well **** it");
    assert_eq!(carol.recv().await, "alice: well **** it");

    // The sender gets no echo: the next frame it sees is the reply to /users.
    alice.send("/users").await;
    assert_eq!(alice.recv().await, "Clients: alice, bob, carol.");

    // The console records the unfiltered line.
    assert!(server.console_has("alice >> well darn it"));
}

#[tokio::test]
async fn empty_filter_list_leaves_chat_untouched() {
    let server = start_server_with_filter(Some(Vec::new())).await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    alice.send("spaced  out   line").await;
    assert_eq!(bob.recv().await, "alice: spaced  out   line");
}

#[tokio::test]
async fn rename_notifies_sender_and_others() {
    let server = start_server().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob has connected.");

    alice.send("##alicia").await;
    assert_eq!(alice.recv().await, "Name updated to alicia");
    assert_eq!(bob.recv().await, "alice has changed name to alicia.");

    bob.send("/users").await;
    assert_eq!(bob.recv().await, "Clients: alicia, bob.");
}

#[tokio::test]
async fn private_message_reaches_every_session_with_that_name() {
    let server = start_server().await;
    let mut alice = server.join("alice").await;
    let mut carol1 = server.join("carol").await;
    let mut carol2 = server.connect().await;
    carol2.send("##carol").await;

    assert_eq!(alice.recv().await, "carol has connected.");
    assert_eq!(alice.recv().await, "carol has connected.");
    assert_eq!(carol1.recv().await, "carol has connected.");

    alice.send("/msg carol lunch?").await;
    assert_eq!(carol1.recv().await, "Private message from alice: lunch?");
    assert_eq!(carol2.recv().await, "Private message from alice: lunch?");

    alice.send("/m zed hello").await;
    assert_eq!(alice.recv().await, "zed does not exist, check /users.");
}

#[tokio::test]
async fn help_and_errors_are_answered_to_sender() {
    let server = start_server().await;
    let mut alice = server.join("alice").await;

    alice.send("/help").await;
    assert_eq!(alice.recv().await, CLIENT_HELP);

    alice.send("/msg bob").await;
    assert_eq!(alice.recv().await, MISSING_MESSAGE);

    alice.send("/shutdown").await;
    assert_eq!(alice.recv().await, UNKNOWN_COMMAND);

    alice.send("/kick bob").await;
    assert_eq!(alice.recv().await, UNKNOWN_COMMAND);
}

#[tokio::test]
async fn logout_acknowledges_and_closes() {
    let server = start_server().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob has connected.");

    alice.send("/logout").await;
    assert_eq!(alice.recv().await, "Server: you have been logged out.");
    alice.expect_closed().await;
    assert_eq!(bob.recv().await, "alice has disconnected.");

    bob.send("/users").await;
    assert_eq!(bob.recv().await, "Clients: bob.");
}

#[tokio::test]
async fn dropped_connection_is_treated_as_logout() {
    let server = start_server().await;
    let alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    drop(alice);
    assert_eq!(bob.recv().await, "alice has disconnected.");
    assert!(server
        .console
        .lock()
        .iter()
        .any(|l| l.starts_with("Session error: ") && l.ends_with("| alice")));
}

#[tokio::test]
async fn operator_messages_and_kicks() {
    let server = start_server().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob has connected.");

    server.operator("maintenance at noon").await;
    assert_eq!(alice.recv().await, "SERVER: maintenance at noon");
    assert_eq!(bob.recv().await, "SERVER: maintenance at noon");

    server.operator("/m alice psst").await;
    assert_eq!(alice.recv().await, "Private message from SERVER: psst");

    server.operator("/kick bob spamming").await;
    assert_eq!(
        bob.recv().await,
        "Kicked by SERVER reason: spamming | please logout with /logout"
    );
    bob.expect_closed().await;
    assert_eq!(alice.recv().await, "bob has been kicked.");

    alice.send("/users").await;
    assert_eq!(alice.recv().await, "Clients: alice.");
}

#[tokio::test]
async fn failed_handshake_does_not_disturb_server() {
    use tokio::io::AsyncWriteExt;

    let server = start_server().await;
    let mut junk = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    junk.write_all(b"this is not a TLS client hello").await.unwrap();
    drop(junk);

    let mut alice = server.join("alice").await;
    alice.send("/users").await;
    assert_eq!(alice.recv().await, "Clients: alice.");
}
