//! Session lifecycle and refresh-token tree management for the
//! authkestra authentication core (spec §4.3, §4.4).

pub mod envelope;
pub mod refresh_tree;
pub mod session_manager;

pub use envelope::{EnvelopeCodec, RefreshTokenEnvelope};
pub use refresh_tree::{ExchangeResult, RefreshTokenTree, REUSE_WINDOW};
pub use session_manager::SessionManager;

#[cfg(test)]
mod tests {
    use super::*;
    use authkestra_store::{AuthStore, MemoryStore, NewUser};
    use authkestra_token::TokenManager;
    use chrono::Utc;

    fn test_token_manager() -> TokenManager {
        TokenManager::for_testing(b"test-signing-secret", "https://auth.example.com", "convex")
    }

    #[tokio::test]
    async fn first_exchange_mints_a_child_and_new_session_chain_continues() {
        let store = MemoryStore::new();
        let codec = EnvelopeCodec::new(b"envelope-secret".to_vec());
        let token_manager = test_token_manager();
        let session_manager = SessionManager::new(&token_manager);
        let tree = RefreshTokenTree::new(&codec, &token_manager, session_manager.jwt_ttl());
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let user = tx.insert_user(NewUser::default()).await.unwrap();
        let session = session_manager.create(&mut *tx, user.id.clone(), now).await.unwrap();
        let root = tx
            .insert_refresh_token(authkestra_store::NewRefreshToken {
                session_id: session.id.clone(),
                expiration_time: session.expiration_time,
                parent_refresh_token_id: None,
            })
            .await
            .unwrap();
        let presented = codec.encode(&RefreshTokenEnvelope {
            session_id: session.id.clone(),
            token_id: root.id.clone(),
        });

        let result = tree.exchange(&mut *tx, &presented, now).await.unwrap().unwrap();
        assert!(!result.access_token.is_empty());
        assert_ne!(result.refresh_token, presented);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn reexchanging_the_active_child_is_not_theft() {
        // Spec §8 scenario 3: root -> B, then re-exchanging root while B is
        // still the active, unused child is treated as a racing duplicate,
        // not theft — it returns B again rather than invalidating anything.
        let store = MemoryStore::new();
        let codec = EnvelopeCodec::new(b"envelope-secret".to_vec());
        let token_manager = test_token_manager();
        let session_manager = SessionManager::new(&token_manager);
        let tree = RefreshTokenTree::new(&codec, &token_manager, session_manager.jwt_ttl());
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let user = tx.insert_user(NewUser::default()).await.unwrap();
        let session = session_manager.create(&mut *tx, user.id.clone(), now).await.unwrap();
        let root = tx
            .insert_refresh_token(authkestra_store::NewRefreshToken {
                session_id: session.id.clone(),
                expiration_time: session.expiration_time,
                parent_refresh_token_id: None,
            })
            .await
            .unwrap();
        let presented = codec.encode(&RefreshTokenEnvelope {
            session_id: session.id.clone(),
            token_id: root.id.clone(),
        });

        let first = tree.exchange(&mut *tx, &presented, now).await.unwrap().unwrap();
        let b = codec.decode(&first.refresh_token).unwrap();

        let later = now + chrono::Duration::seconds(60);
        let replay = tree.exchange(&mut *tx, &presented, later).await.unwrap().unwrap();
        let replayed_b = codec.decode(&replay.refresh_token).unwrap();
        assert_eq!(replayed_b.token_id, b.token_id, "result equals B still, because B is active");
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn reuse_outside_window_after_active_child_is_consumed_invalidates_the_whole_subtree() {
        // Spec §8 scenario 4: root -> B -> C. Re-exchanging root once C (not
        // B) is the active child, and outside the reuse window, is theft —
        // the entire subtree (root, B, C) dies and the exchange yields None.
        let store = MemoryStore::new();
        let codec = EnvelopeCodec::new(b"envelope-secret".to_vec());
        let token_manager = test_token_manager();
        let session_manager = SessionManager::new(&token_manager);
        let tree = RefreshTokenTree::new(&codec, &token_manager, session_manager.jwt_ttl());
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let user = tx.insert_user(NewUser::default()).await.unwrap();
        let session = session_manager.create(&mut *tx, user.id.clone(), now).await.unwrap();
        let root = tx
            .insert_refresh_token(authkestra_store::NewRefreshToken {
                session_id: session.id.clone(),
                expiration_time: session.expiration_time,
                parent_refresh_token_id: None,
            })
            .await
            .unwrap();
        let root_presented = codec.encode(&RefreshTokenEnvelope {
            session_id: session.id.clone(),
            token_id: root.id.clone(),
        });

        let root_to_b = tree.exchange(&mut *tx, &root_presented, now).await.unwrap().unwrap();
        let b_presented = root_to_b.refresh_token.clone();

        let just_after = now + chrono::Duration::seconds(1);
        let b_to_c = tree.exchange(&mut *tx, &b_presented, just_after).await.unwrap().unwrap();
        let c = codec.decode(&b_to_c.refresh_token).unwrap();

        let far_later = now + chrono::Duration::seconds(60);
        let replay = tree.exchange(&mut *tx, &root_presented, far_later).await.unwrap();
        assert!(replay.is_none(), "reuse outside the window, once superseded, is theft");

        let c_presented = codec.encode(&c);
        let reexchanged = tree.exchange(&mut *tx, &c_presented, far_later).await.unwrap();
        assert!(reexchanged.is_none(), "descendant of the invalidated subtree must also be dead");
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn tampered_envelope_fails_silently() {
        let store = MemoryStore::new();
        let codec = EnvelopeCodec::new(b"envelope-secret".to_vec());
        let token_manager = test_token_manager();
        let session_manager = SessionManager::new(&token_manager);
        let tree = RefreshTokenTree::new(&codec, &token_manager, session_manager.jwt_ttl());
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let result = tree.exchange(&mut *tx, "garbage:not-real:sig", now).await.unwrap();
        assert!(result.is_none());
        tx.commit().await.unwrap();
    }
}
