pub mod client;
pub mod gateway;
pub mod handlers;
pub mod pusher;
pub mod rpc;
pub mod server;

pub use client::ClientRegistry;
pub use gateway::GatewayPusher;
pub use pusher::WsPusher;
pub use server::{start, Ingress, ServerConfig, ServerHandle};
