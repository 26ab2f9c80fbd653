use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use hyper_sdk::{
    Event, EventKind, GetOptions, JoinOptions, Key, Sdk, SdkConfig, SdkError, State,
    StorageLocation, TopicId, create,
    defaults::DNS_LINK_PREFIX,
    resolve::{ResolveError, ResolvedTarget},
    test_utils::{MemHandle, MemNetwork, MemStorage, MemStorageProvider, StaticDns},
    to_url,
};
use n0_snafu::{Result, ResultExt};
use tracing_test::traced_test;

const KEY: &str = "yry3fho3dxqfg1n8p7mgqx1e3o4u9jmf4kopnqp6rpjhzb37hsky";
const ME: Key = Key::from_bytes([0xee; 32]);
const PEER: Key = Key::from_bytes([0x11; 32]);

struct Setup {
    sdk: Sdk,
    storage: MemStorage,
    network: MemNetwork,
}

async fn setup_with(config: SdkConfig, dns: StaticDns) -> Result<Setup> {
    let storage = MemStorage::new();
    let network = MemNetwork::new(ME);
    let sdk = Sdk::builder(config)
        .storage(storage.clone())
        .network(network.clone())
        .dns_transport(dns)
        .spawn()
        .await?;
    sdk.ready().await?;
    Ok(Setup {
        sdk,
        storage,
        network,
    })
}

async fn setup() -> Result<Setup> {
    setup_with(SdkConfig::ephemeral(), StaticDns::new()).await
}

fn topic_of(key: &Key) -> TopicId {
    TopicId::from(MemHandle::discovery_key_for(key))
}

async fn wait_for(mut f: impl FnMut() -> bool) {
    while !f() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
#[traced_test]
async fn lifecycle() -> Result {
    let storage = MemStorage::new();
    let network = MemNetwork::new(ME);
    let sdk = Sdk::builder(SdkConfig::ephemeral())
        .storage(storage.clone())
        .network(network.clone())
        .spawn()
        .await?;
    assert_eq!(sdk.state(), State::Uninitialized);
    assert_eq!(sdk.id(), ME);

    let err = sdk.get(KEY, GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, SdkError::NotReady { .. }));

    sdk.ready().await?;
    sdk.ready().await?;
    assert_eq!(sdk.state(), State::Ready);
    assert!(storage.is_ready());
    assert!(network.is_listening());

    sdk.close().await?;
    assert!(sdk.is_closed());
    assert!(storage.is_closed());
    assert!(network.is_destroyed());
    // closing again is fine
    sdk.close().await?;

    let err = sdk.get(KEY, GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, SdkError::Closed { .. }));
    let err = sdk.join("chat", None).unwrap_err();
    assert!(matches!(err, SdkError::Closed { .. }));
    let err = sdk.ready().await.unwrap_err();
    assert!(matches!(err, SdkError::Closed { .. }));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn missing_parameters() {
    let err = Sdk::builder(SdkConfig::default())
        .storage(MemStorage::new())
        .spawn()
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::InvalidParameter { name: "network", .. }));

    let err = Sdk::builder(SdkConfig::default())
        .network(MemNetwork::new(ME))
        .spawn()
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::InvalidParameter { name: "storage", .. }));
}

#[tokio::test]
#[traced_test]
async fn create_opens_configured_storage() -> Result {
    let provider = MemStorageProvider::new();
    let sdk = create(
        SdkConfig::ephemeral(),
        provider.clone(),
        MemNetwork::new(ME),
    )
    .await?;
    assert_eq!(sdk.state(), State::Ready);
    assert_eq!(provider.locations(), vec![StorageLocation::Memory]);
    assert!(provider.storage().is_ready());

    let dir = tempfile::tempdir().e()?;
    let config = SdkConfig {
        storage: dir.path().to_str().expect("utf8").into(),
        ..Default::default()
    };
    let provider = MemStorageProvider::new();
    let _sdk = create(config, provider.clone(), MemNetwork::new(ME)).await?;
    assert_eq!(
        provider.locations(),
        vec![StorageLocation::Dir(dir.path().to_path_buf())]
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn get_by_name_is_writable_and_does_not_wait() -> Result {
    let Setup {
        sdk,
        storage,
        network,
    } = setup().await?;
    let handle = sdk.get("my-app-data", GetOptions::default()).await?;
    assert!(handle.writable());
    assert_eq!(handle.key(), storage.key_for_name("my-app-data"));
    assert_eq!(
        storage.requests()[0].target,
        ResolvedTarget::Name("my-app-data".into())
    );

    // auto-joined the discovery key, not a topic derived from the name
    let topic = TopicId::from(handle.discovery_key());
    assert_eq!(network.joined_topics(), vec![topic]);
    assert_ne!(topic, TopicId::from_name("my-app-data"));
    assert!(handle.discovery().is_attached());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn get_waits_for_first_peer() -> Result {
    let Setup { sdk, network, .. } = setup().await?;
    let key: Key = KEY.parse()?;
    let topic = topic_of(&key);

    let task = tokio::spawn({
        let sdk = sdk.clone();
        async move { sdk.get(key, GetOptions::default()).await }
    });
    wait_for(|| !network.sessions(topic).is_empty()).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!task.is_finished(), "returned before a peer was found");

    network.connect(PEER, vec![topic]);
    let handle = task.await.e()??;
    assert_eq!(handle.key(), key);
    assert!(!handle.writable());
    assert!(network.sessions(topic)[0].is_flushed());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn get_with_local_data_does_not_wait() -> Result {
    let Setup {
        sdk,
        storage,
        network,
    } = setup().await?;
    let key: Key = KEY.parse()?;
    storage.preload(key, 3);
    let handle = sdk.get(to_url(&key), GetOptions::default()).await?;
    assert_eq!(handle.len(), 3);
    assert_eq!(network.joined_topics(), vec![topic_of(&key)]);
    assert!(!network.sessions(topic_of(&key))[0].is_flushed());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn get_without_auto_join() -> Result {
    let Setup { sdk, network, .. } = setup().await?;
    let handle = sdk
        .get(KEY, GetOptions::default().auto_join(false))
        .await?;
    assert!(!handle.discovery().is_attached());
    assert!(network.joined_topics().is_empty());

    let config = SdkConfig {
        auto_join: false,
        ..SdkConfig::ephemeral()
    };
    let Setup { sdk, network, .. } = setup_with(config, StaticDns::new()).await?;
    sdk.get(KEY, GetOptions::default()).await?;
    assert!(network.joined_topics().is_empty());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn get_twice_joins_once() -> Result {
    let Setup { sdk, network, .. } = setup().await?;
    let first = sdk.get("twice", GetOptions::default()).await?;
    let second = sdk.get("twice", GetOptions::default()).await?;
    assert_eq!(first.key(), second.key());
    assert_eq!(network.joined_topics().len(), 1);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn join_options_per_call() -> Result {
    let config = SdkConfig {
        join_opts: JoinOptions {
            server: Some(false),
            client: None,
        },
        ..SdkConfig::ephemeral()
    };
    let Setup { sdk, network, .. } = setup_with(config, StaticDns::new()).await?;
    let handle = sdk.get("options", GetOptions::default()).await?;
    let topic = TopicId::from(handle.discovery_key());
    assert_eq!(
        network.join_options(topic),
        Some(JoinOptions {
            server: Some(false),
            client: Some(true),
        })
    );

    let handle = sdk
        .get(
            "options-2",
            GetOptions::default().join(JoinOptions {
                server: Some(true),
                client: Some(false),
            }),
        )
        .await?;
    let topic = TopicId::from(handle.discovery_key());
    assert_eq!(
        network.join_options(topic),
        Some(JoinOptions {
            server: Some(true),
            client: Some(false),
        })
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn flush_timeout() -> Result {
    let config = SdkConfig {
        flush_timeout: Some(Duration::from_secs(10)),
        ..SdkConfig::ephemeral()
    };
    let Setup { sdk, network, .. } = setup_with(config, StaticDns::new()).await?;
    let key: Key = KEY.parse()?;
    let err = sdk.get(key, GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, SdkError::FlushTimeout { topic, .. } if topic == topic_of(&key)));

    // the facade is still usable, and the session stays attached
    let handle = sdk.get(key, GetOptions::default()).await?;
    assert!(handle.discovery().is_attached());
    assert_eq!(network.sessions(topic_of(&key)).len(), 1);

    // a per-call timeout wins over the config
    let other = Key::from_bytes([3; 32]);
    let task = tokio::spawn({
        let sdk = sdk.clone();
        async move {
            sdk.get(other, GetOptions::default().flush_timeout(Duration::from_secs(60)))
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!task.is_finished());
    network.connect(PEER, vec![topic_of(&other)]);
    task.await.e()??;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn session_destroyed_once_on_close() -> Result {
    let Setup {
        sdk,
        storage,
        network,
    } = setup().await?;
    let handle = sdk.get("closing", GetOptions::default()).await?;
    let topic = TopicId::from(handle.discovery_key());
    let session = network.sessions(topic).pop().expect("joined");

    storage.handle(&handle.key()).expect("open").close();
    wait_for(|| session.destroy_count() > 0).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.destroy_count(), 1);
    assert!(!handle.discovery().is_attached());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn close_destroys_sessions_of_open_handles() -> Result {
    let Setup { sdk, network, .. } = setup().await?;
    let handle = sdk.get("still-open", GetOptions::default()).await?;
    let session = network
        .sessions(TopicId::from(handle.discovery_key()))
        .pop()
        .expect("joined");

    sdk.close().await?;
    assert_eq!(session.destroy_count(), 1);
    assert!(!handle.discovery().is_attached());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn dns_urls() -> Result {
    let dns = StaticDns::new().with_dnslink("example.com", &format!("{DNS_LINK_PREFIX}{KEY}"));
    let Setup { sdk, storage, .. } = setup_with(SdkConfig::ephemeral(), dns.clone()).await?;
    let key: Key = KEY.parse()?;

    assert_eq!(
        sdk.resolve("hyper://example.com/", None).await?,
        ResolvedTarget::Key(key)
    );
    assert_eq!(sdk.resolve_dns_to_key("example.com", None).await?, key);

    storage.preload(key, 1);
    let handle = sdk
        .get("hyper://example.com/", GetOptions::default())
        .await?;
    assert_eq!(handle.key(), key);
    // every lookup goes to DNS again
    assert_eq!(dns.queries().len(), 3);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn resolution_errors_are_per_call() -> Result {
    let Setup { sdk, storage, .. } = setup().await?;

    let err = sdk
        .get("hyper://not-a-key-not-a-domain/", GetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SdkError::Resolve {
            source: ResolveError::MalformedUrl { .. },
            ..
        }
    ));

    let err = sdk
        .get("hyper://example.com/", GetOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("_dnslink.example.com"), "{err}");

    let err = sdk
        .get(vec![1u8, 2, 3], GetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SdkError::Resolve {
            source: ResolveError::InvalidIdentifier { len: 3, .. },
            ..
        }
    ));
    assert!(storage.requests().is_empty());

    // still usable
    sdk.get("after-errors", GetOptions::default()).await?;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn custom_dns_link_prefix() -> Result {
    let dns = StaticDns::new().with_dnslink("example.net", &format!("dnslink=/custom/{KEY}"));
    let config = SdkConfig {
        dns_link_prefix: "dnslink=/custom/".into(),
        ..SdkConfig::ephemeral()
    };
    let Setup { sdk, .. } = setup_with(config, dns).await?;
    assert_eq!(
        sdk.resolve("hyper://example.net/", None).await?,
        ResolvedTarget::Key(KEY.parse()?)
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn join_leave_by_name_or_topic() -> Result {
    let Setup { sdk, network, .. } = setup().await?;
    let topic = Sdk::topic_for("chat");
    assert_eq!(topic, TopicId::from_name("chat"));

    let session = sdk.join("chat", None)?;
    assert_eq!(session.topic(), topic);
    sdk.join(topic, None)?;
    assert_eq!(network.joined_topics(), vec![topic, topic]);

    sdk.leave("chat").await?;
    sdk.leave(topic).await?;
    assert_eq!(network.left_topics(), vec![topic, topic]);

    sdk.join_peer(PEER)?;
    assert!(network.joined_peers().contains(&PEER));
    sdk.leave_peer(PEER)?;
    assert!(network.joined_peers().is_empty());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn peer_events_and_replication() -> Result {
    let Setup {
        sdk,
        storage,
        network,
    } = setup().await?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let id = sdk.subscribe(EventKind::PeerAdd, {
        let seen = seen.clone();
        move |event| seen.lock().unwrap().push(event.clone())
    });
    let mut events = sdk.events();

    let topic = TopicId::from_name("peers");
    let connection = network.connect(PEER, vec![topic]);

    let event = events.recv().await.e()?;
    assert_eq!(event.kind(), EventKind::PeerAdd);
    assert_eq!(event.peer().public_key, PEER);
    assert_eq!(event.peer().topics, vec![topic]);
    assert_eq!(storage.replicated(), vec![PEER]);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(sdk.peers().len(), 1);
    assert_eq!(sdk.connections().len(), 1);

    connection.close();
    let event = events.recv().await.e()?;
    assert!(matches!(event, Event::PeerRemove(info) if info.public_key == PEER));
    assert!(sdk.peers().is_empty());

    assert!(sdk.unsubscribe(id));
    network.connect(PEER, vec![]);
    events.recv().await.e()?;
    assert_eq!(seen.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn close_reports_removal_of_open_connections() -> Result {
    let Setup { sdk, network, .. } = setup().await?;
    let removed = Arc::new(Mutex::new(Vec::new()));
    sdk.subscribe(EventKind::PeerRemove, {
        let removed = removed.clone();
        move |event| removed.lock().unwrap().push(event.peer().public_key)
    });
    let mut events = sdk.events();
    let connection = network.connect(PEER, vec![TopicId::from_name("shutdown")]);
    let event = events.recv().await.e()?;
    assert_eq!(event.kind(), EventKind::PeerAdd);

    sdk.close().await?;
    assert!(connection.is_closed());
    assert_eq!(*removed.lock().unwrap(), vec![PEER]);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn no_replication_when_disabled() -> Result {
    let config = SdkConfig {
        do_replicate: false,
        ..SdkConfig::ephemeral()
    };
    let Setup {
        sdk,
        storage,
        network,
    } = setup_with(config, StaticDns::new()).await?;
    let mut events = sdk.events();
    network.connect(PEER, vec![]);
    events.recv().await.e()?;
    assert!(storage.replicated().is_empty());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn storage_passthrough() -> Result {
    let Setup { sdk, storage, .. } = setup().await?;
    let pair = sdk.create_key_pair("keys").await?;
    assert_eq!(pair.public_key, storage.key_for_name("keys"));

    let scoped = sdk.namespace("scope")?;
    let pair_scoped = scoped.create_key_pair("keys").await?;
    assert_ne!(pair.public_key, pair_scoped.public_key);

    sdk.get("core", GetOptions::default()).await?;
    assert_eq!(sdk.cores().len(), 1);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn metrics() -> Result {
    let Setup { sdk, network, .. } = setup().await?;
    sdk.get("counted", GetOptions::default()).await?;
    sdk.resolve(KEY, None).await?;
    let mut events = sdk.events();
    network.connect(PEER, vec![]);
    events.recv().await.e()?;

    let metrics = sdk.metrics();
    assert_eq!(metrics.resolve_name.get(), 1);
    assert_eq!(metrics.resolve_key.get(), 1);
    assert_eq!(metrics.auto_joins.get(), 1);
    assert_eq!(metrics.topics_joined.get(), 1);
    assert_eq!(metrics.peers_added.get(), 1);
    Ok(())
}
