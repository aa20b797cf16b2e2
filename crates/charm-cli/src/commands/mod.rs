pub mod ack;
pub mod notices;
pub mod state;
