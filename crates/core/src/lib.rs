pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod messages;
pub mod missions;
pub mod ports;

pub use domain::account::{Account, AccountRole, ChatId, MessageId, NewAccount};
pub use domain::mission::{MissionCompletion, MissionType};
pub use domain::seller::{ListedProduct, ProductCategory, ProductRecord, Seller, SellerUpdate};
pub use errors::{DomainError, FlowError};
pub use flows::{AdvanceOutcome, Collaborators, FlowInstance, FlowKind, StepEngine, StepInput};
pub use messages::{Keyboard, OutgoingMessage};
pub use missions::{week_number, ClaimOutcome, MissionTracker};
