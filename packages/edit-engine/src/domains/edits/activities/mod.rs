pub mod apply;
pub mod edit_actions;
pub mod resolution;

pub use apply::execute_edit;
pub use edit_actions::{
    cancel_edit, comment_on_edit, create_edit, get_edit, list_pending_edits, moderate_edit,
    revise_edit, vote_on_edit, EditDetails, ModerationDecision, PendingEdit,
};
pub use resolution::{apply_accepted_edit, run_vote_tick, ApplyOutcome, TickReport};
