//! Gateway protocol definitions
//!
//! Op codes, frame format, payloads, and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{
    CloseAction, CloseCode, ClosePolicy, ReidentifyReason, NORMAL_CLOSURE, RESUME_CLOSURE,
};
pub use messages::{DispatchEvent, GatewayMessage};
pub use opcodes::OpCode;
pub use payloads::{
    Activity, GuildCreatePayload, GuildMembersChunkPayload, GuildSyncPayload, HelloPayload,
    IdentifyPayload, IdentifyProperties, Presence, ReadyPayload, ReadyUser,
    RequestGuildMembersPayload, ResumePayload, Status, StatusUpdatePayload,
};
