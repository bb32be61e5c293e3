//! Conversation table
//!
//! In-memory owner of every conversation state, subscribed filter URL and chat
//! membership list. Every mutation is mirrored to the store as a
//! `bot;usr:<u>;chat:<id>` hash through the [`Persister`]; memory stays the
//! source of truth.

use futures::FutureExt;
use std::collections::HashMap;

use crate::models::{ChatId, ConversationState, SubscriberKey};
use crate::storage::{Persister, SharedStore};

/// Hash field holding the conversation state
pub const STATE_FIELD: &str = "state";

/// Hash field holding the subscribed filter URL
pub const URL_FIELD: &str = "url";

/// Initial capacity of the maps
const INITIAL_CAPACITY: usize = 10;

pub struct ConversationTable {
    states: HashMap<SubscriberKey, ConversationState>,
    urls: HashMap<SubscriberKey, String>,
    chats: HashMap<ChatId, Vec<SubscriberKey>>,
    store: SharedStore,
    persister: Persister,
}

impl ConversationTable {
    pub fn new(store: SharedStore, persister: Persister) -> Self {
        Self {
            states: HashMap::with_capacity(INITIAL_CAPACITY),
            urls: HashMap::with_capacity(INITIAL_CAPACITY),
            chats: HashMap::with_capacity(INITIAL_CAPACITY),
            store,
            persister,
        }
    }

    pub fn state(&self, key: &SubscriberKey) -> Option<ConversationState> {
        self.states.get(key).copied()
    }

    pub fn url(&self, key: &SubscriberKey) -> Option<&str> {
        self.urls.get(key).map(String::as_str)
    }

    /// Subscribed keys of a chat, in subscription order
    pub fn chat_members(&self, chat_id: ChatId) -> Vec<SubscriberKey> {
        self.chats.get(&chat_id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Enter `state`
    ///
    /// Subscribed joins the chat membership and persists the state field;
    /// Default leaves the membership and deletes the persisted record.
    pub fn set_state(&mut self, key: &SubscriberKey, state: ConversationState) {
        self.states.insert(key.clone(), state);
        match state {
            ConversationState::Subscribed => {
                self.join_chat(key);
                self.mirror_field(key, STATE_FIELD, state.as_store_value().to_string());
            }
            ConversationState::Default => {
                self.leave_chat(key);
                self.mirror_delete(key);
            }
        }
    }

    pub fn set_url(&mut self, key: &SubscriberKey, url: &str) {
        self.urls.insert(key.clone(), url.to_string());
        self.mirror_field(key, URL_FIELD, url.to_string());
    }

    /// Forget `key` entirely, in memory and in the store
    pub fn delete(&mut self, key: &SubscriberKey) {
        self.states.remove(key);
        self.urls.remove(key);
        self.leave_chat(key);
        self.mirror_delete(key);
    }

    /// Install a recovered record without writing it back
    pub fn restore(&mut self, key: &SubscriberKey, state: ConversationState, url: String) {
        self.states.insert(key.clone(), state);
        self.urls.insert(key.clone(), url);
        if state == ConversationState::Subscribed {
            self.join_chat(key);
        }
    }

    /// Keys currently in the Default state
    pub fn idle_keys(&self) -> Vec<SubscriberKey> {
        self.states
            .iter()
            .filter(|(_, state)| **state == ConversationState::Default)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn join_chat(&mut self, key: &SubscriberKey) {
        let members = self.chats.entry(key.chat_id).or_default();
        if !members.contains(key) {
            members.push(key.clone());
        }
    }

    fn leave_chat(&mut self, key: &SubscriberKey) {
        if let Some(members) = self.chats.get_mut(&key.chat_id) {
            members.retain(|member| member != key);
            if members.is_empty() {
                self.chats.remove(&key.chat_id);
            }
        }
    }

    fn mirror_field(&self, key: &SubscriberKey, field: &'static str, value: String) {
        let store = self.store.clone();
        let record = key.conversation_record();
        self.persister.spawn(
            "hset",
            record.clone(),
            async move { store.set_hash_field(&record, field, &value).await }.boxed(),
        );
    }

    fn mirror_delete(&self, key: &SubscriberKey) {
        let store = self.store.clone();
        let record = key.conversation_record();
        self.persister.spawn(
            "del",
            record.clone(),
            async move { store.delete_key(&record).await }.boxed(),
        );
    }
}
