// Convostate - per-device conversation read-state over a shared config tree

pub mod canonical;
pub mod convo;
pub mod error;
pub mod iter;
pub mod records;
pub mod retention;
pub mod store;
pub mod tree;

pub use canonical::{MAX_ROOM, MAX_URL};
pub use convo::{Community, Conversation, LegacyGroup, OneToOne};
pub use error::{ConvoError, RoomError, UrlError};
pub use iter::ConvoCursor;
pub use retention::RetentionPolicy;
pub use store::ConvoStore;
pub use tree::{ConfigTree, MemoryTree, Node};
