pub mod catalog;
pub mod engine;
pub mod states;
pub mod store;
pub mod validation;

pub use catalog::{catalog_for, ChoiceSet, InputKind, StepCatalog, StepDefinition, Validator};
pub use engine::{
    wrong_kind_message, AdvanceOutcome, Collaborators, Completion, StepEngine, StepInput,
};
pub use states::{FieldValue, FlowInstance, FlowKind, StepCursor};
pub use store::{FlowStateStore, InMemoryFlowStateStore};
