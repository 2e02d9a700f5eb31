//! flowlink core library: dispatch prompts to a remote workflow engine and route its
//! callbacks back to the chat conversation that asked, used by the `flowlink` CLI.

pub mod callback;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod gateway;
pub mod init;
pub mod notices;
pub mod service;
pub mod session;
pub mod sweep;
pub mod workflow;

#[cfg(test)]
mod testing;
