pub mod aws_eventstream;
pub mod sse;
