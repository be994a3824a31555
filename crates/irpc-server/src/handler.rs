//! The typed registration surface that replaces reflective dispatch
//! (§4.5's `Register`/`RegisterName`/`RegisterFunction`, resolved per §9
//! Design Notes and SPEC_FULL.md §4.5a).
//!
//! A registered method owns its own decode/invoke/encode closure triple —
//! there is no runtime type inspection and no per-type reflective pool;
//! the `Args`/`Reply` types are fixed at registration time.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use irpc_proto::{error_code, Codec, ServiceError};

#[async_trait]
pub(crate) trait Handler: Send + Sync {
    async fn invoke(&self, codec: Codec, payload: &[u8]) -> Result<Vec<u8>, ServiceError>;
}

pub(crate) struct TypedHandler<Args, Reply, F> {
    f: F,
    _marker: PhantomData<fn(Args) -> Reply>,
}

impl<Args, Reply, F> TypedHandler<Args, Reply, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<Args, Reply, F, Fut> Handler for TypedHandler<Args, Reply, F>
where
    Args: DeserializeOwned + Send + 'static,
    Reply: Serialize + Send + 'static,
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, ServiceError>> + Send,
{
    async fn invoke(&self, codec: Codec, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let args: Args = codec
            .decode(payload)
            .map_err(|e| ServiceError::new(error_code::INVALID_PARAMS, e.to_string()))?;
        let reply = (self.f)(args).await?;
        codec
            .encode(&reply)
            .map_err(|e| ServiceError::internal(e.to_string()))
    }
}
