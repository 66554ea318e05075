mod event;
mod parser;
mod ring_buffer;

pub use event::{Event, EventType, HealthSignal, HealthState};
pub use parser::LogParser;
pub use ring_buffer::RingBuffer;
