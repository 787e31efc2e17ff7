//! Integration tests: adapters, scheduler and store wired together
//! against an in-memory pool source.

mod mock_source;
mod pipeline;
