//! Persistence for docpilot.
//!
//! A thin [`KvStore`] abstraction (string keys, TTLs, ordered lists) with a
//! Redis backend for production and an in-memory backend for tests, plus the
//! typed stores the runtime actually talks to: chats, messages, the commit
//! log, and the entity snapshot store.
//!
//! Key layout:
//! - `chat:{id}` — chat metadata
//! - `chat:{id}:msgs` — transcript (ordered list)
//! - `chat:{id}:commits` — commit hashes (ordered list)
//! - `commit:{hash}` — commit blob
//! - `snap:{entity_type}:{entity_id}:{hash}` — snapshot blob, 7-day TTL

pub mod chats;
pub mod commits;
pub mod kv;
pub mod memory;
pub mod messages;
pub mod redis_store;
pub mod snapshots;

pub use chats::ChatStore;
pub use commits::CommitLog;
pub use kv::KvStore;
pub use memory::MemoryStore;
pub use messages::MessageStore;
pub use redis_store::RedisStore;
pub use snapshots::SnapshotStore;
