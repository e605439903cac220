//! Offline-tolerant kanban board synchronization.
//!
//! Local edits apply optimistically through the [`coordinator`], are queued
//! while the remote is unreachable, and are reconciled by the background
//! [`sync`] loop with a three-way [`merge`] against the last confirmed state.

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod merge;
pub mod mutation;
pub mod queue;
pub mod remote;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;

pub use config::SyncSettings;
pub use connectivity::{ConnectivityMonitor, ManualConnectivity};
pub use coordinator::{Coordinator, DispatchOutcome};
pub use error::{DispatchError, RemoteError, SessionError, StorageError, SyncError, ValidationError};
pub use history::{BoardHistory, UndoHistory};
pub use merge::{three_way_merge, Conflict, MergeResult, Resolution};
pub use mutation::{CardDraft, CardPatch, Mutation};
pub use queue::{OperationQueue, QueueItem};
pub use remote::{HttpRemote, InMemoryRemote, RemoteBoard};
pub use session::OfflineBoard;
pub use store::BoardStore;
pub use sync::{SyncEvent, SyncHandle, SyncOutcome, Synchronizer};
pub use types::{Board, BoardList, Card, Priority};
