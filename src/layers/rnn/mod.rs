pub mod cond_gru;
pub mod cond_gru_multi;
pub mod gru;
pub mod lstm;

pub use cond_gru::{CondGruOutput, CondGruSequence, CondGruWeights, ConditionalGru, ConditionalGruStep, ContextUpdate};
pub use cond_gru_multi::{ConditionalGruMulti, ConditionalGruMultiStep, MultiOutput, MultiSequence};
pub use gru::{Gru, GruInput, GruProjections, GruStep, GruStepNorm, GruUnit, GruWeights};
pub use lstm::{Lstm, LstmOutput, LstmState, LstmStep, LstmWeights};
