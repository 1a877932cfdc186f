pub mod comment;
pub mod edit;
pub mod entity;
pub mod payload;
pub mod vote;

pub use comment::EditComment;
pub use edit::{CreateEdit, Edit, EditStatus};
pub use entity::EntityRecord;
pub use payload::{EditOperation, EditPayload, FieldChange, FieldKind, FieldOp, TargetType};
pub use vote::{Vote, VoteValue};
