//! `SelectByUser` (§4.6): selection delegated entirely to a caller-supplied
//! function. Returning `None` (the source's empty string) means "no
//! server".

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::selector::{SelectContext, Selector, ServerMap};

pub type UserSelectFn = Arc<dyn Fn(&SelectContext<'_>, &[String]) -> Option<String> + Send + Sync>;

pub struct SelectByUser {
    f: UserSelectFn,
    endpoints: RwLock<Vec<String>>,
}

impl SelectByUser {
    pub fn new(f: UserSelectFn) -> Self {
        Self {
            f,
            endpoints: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Selector for SelectByUser {
    async fn select(&self, ctx: &SelectContext<'_>) -> Option<String> {
        let endpoints = self.endpoints.read().await;
        (self.f)(ctx, &endpoints)
    }

    async fn update_server(&self, servers: &ServerMap) {
        let mut endpoints: Vec<String> = servers.keys().cloned().collect();
        endpoints.sort();
        *self.endpoints.write().await = endpoints;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn delegates_to_the_user_function() {
        let selector = SelectByUser::new(Arc::new(|_ctx, endpoints| endpoints.last().cloned()));
        let mut servers = HashMap::new();
        servers.insert("a".to_string(), String::new());
        servers.insert("b".to_string(), String::new());
        selector.update_server(&servers).await;

        let ctx = SelectContext::new("Arith", "Mul", b"");
        assert_eq!(selector.select(&ctx).await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn user_function_returning_none_means_no_server() {
        let selector = SelectByUser::new(Arc::new(|_, _| None));
        let ctx = SelectContext::new("Arith", "Mul", b"");
        assert_eq!(selector.select(&ctx).await, None);
    }
}
