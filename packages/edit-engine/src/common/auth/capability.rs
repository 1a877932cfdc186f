/// Capabilities a user may hold on the metadata database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Propose, revise and comment on edits
    Edit,

    /// Cast votes on other users' edits
    Vote,

    /// Close edits immediately (accept or reject) regardless of votes
    Moderate,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Edit => "edit",
            Capability::Vote => "vote",
            Capability::Moderate => "moderate",
        }
    }

    /// Moderators implicitly hold every other capability.
    pub fn is_implied_by(&self, granted: Capability) -> bool {
        granted == *self || granted == Capability::Moderate
    }
}
