use proptest::prelude::*;
use pulse_core::{ConversationStore, Role};
use pulse_memory::SqliteStore;
use pulse_security::Cipher;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn round_trip(cipher: Option<Cipher>, content: &str) -> String {
    let store = SqliteStore::in_memory(cipher).await.unwrap();
    store.append(Role::User, content, None).await.unwrap();
    let history = store.history(1).await.unwrap();
    history[0].content.clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn plaintext_content_round_trips(content in "\\PC*") {
        let read = runtime().block_on(round_trip(None, &content));
        prop_assert_eq!(read, content);
    }

    #[test]
    fn encrypted_content_round_trips(content in "\\PC*") {
        let cipher = Cipher::from_passphrase("round-trip").unwrap();
        let read = runtime().block_on(round_trip(Some(cipher), &content));
        prop_assert_eq!(read, content);
    }

    #[test]
    fn history_is_sorted_and_capped(
        stamps in proptest::collection::vec(0.0f64..1.0e9, 1..20),
        limit in 1usize..25,
    ) {
        let history = runtime().block_on(async {
            let store = SqliteStore::in_memory(None).await.unwrap();
            for ts in &stamps {
                let msg = pulse_core::Message::user("x").with_timestamp(*ts);
                store.insert(&msg).await.unwrap();
            }
            store.history(limit).await.unwrap()
        });

        let mut expected = stamps.clone();
        expected.sort_by(f64::total_cmp);
        expected.truncate(limit);
        let got: Vec<f64> = history.iter().map(|m| m.timestamp).collect();
        prop_assert_eq!(got, expected);
    }
}
