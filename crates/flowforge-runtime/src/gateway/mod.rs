mod response;
mod routes;

pub use response::{RpcError, RpcResponse};
pub use routes::{router, GatewayState};
