//! Data models for Waymark

mod invite;
mod membership;
mod outbox_op;
mod record;

pub use invite::{
    generate_code, normalize_code, Invite, DEFAULT_INVITE_MAX_USES, DEFAULT_INVITE_TTL_SECS,
    INVITE_ALPHABET, INVITE_CODE_LEN,
};
pub use membership::{membership_key, Membership, Role};
pub use outbox_op::{OpKind, OutboxOp, OutboxOperation};
pub use record::{Record, LABEL_FIELD, LOCAL_ONLY_PREFIX};
