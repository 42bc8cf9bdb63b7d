//! Process Data Objects: fixed-size, unacknowledged frames that carry mapped
//! OD entries without SDO's request/response overhead. RPDOs write received
//! payloads into the data store; TPDOs assemble a frame from the data store
//! on a timer or on an event.

mod engine;
mod error;
mod map;

pub use engine::PdoEngine;
pub use error::PdoConfigError;
pub use map::{default_cob_id, pack_descriptor, unpack_descriptor, MappedVariable, PdoDirection, PdoMap};
