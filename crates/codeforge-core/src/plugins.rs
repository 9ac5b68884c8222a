// Plugin manager
//
// Ordered registry of per-session lifecycle hooks. Hooks run in
// registration order; a hook error is logged and aggregated but never
// stops later hooks, and the faulty plugin stays registered until it is
// explicitly unregistered.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::events::EventBus;
use crate::state::{FileConcept, FileRecord};

/// What hooks get to see of the session
#[derive(Clone)]
pub struct PluginContext {
    pub session_id: Uuid,
    pub events: Arc<EventBus>,
}

/// Lifecycle hooks. All default to no-ops so plugins implement only what
/// they care about.
#[async_trait]
pub trait SessionPlugin: Send + Sync {
    /// Unique plugin name; duplicate registrations are ignored
    fn name(&self) -> &str;

    async fn on_register(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_unregister(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_initialize(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn before_files_generated(
        &self,
        _ctx: &PluginContext,
        _phase_name: &str,
        _concepts: &[FileConcept],
    ) -> Result<()> {
        Ok(())
    }

    async fn after_files_generated(
        &self,
        _ctx: &PluginContext,
        _phase_name: &str,
        _outputs: &[FileRecord],
    ) -> Result<()> {
        Ok(())
    }

    async fn before_deployment(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn after_deployment(&self, _ctx: &PluginContext, _preview_url: &str) -> Result<()> {
        Ok(())
    }

    async fn on_generation_start(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_generation_complete(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _ctx: &PluginContext, _error: &str, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn on_state_update(
        &self,
        _ctx: &PluginContext,
        _old: &serde_json::Value,
        _new: &serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct PluginManager {
    ctx: PluginContext,
    plugins: RwLock<Vec<Arc<dyn SessionPlugin>>>,
}

impl PluginManager {
    pub fn new(session_id: Uuid, events: Arc<EventBus>) -> Self {
        Self {
            ctx: PluginContext { session_id, events },
            plugins: RwLock::new(Vec::new()),
        }
    }

    /// Register a plugin. Re-registering a name is a warned no-op.
    pub async fn register(&self, plugin: Arc<dyn SessionPlugin>) {
        {
            let plugins = self.plugins.read().await;
            if plugins.iter().any(|p| p.name() == plugin.name()) {
                warn!(plugin = plugin.name(), "Plugin already registered; ignoring");
                return;
            }
        }
        if let Err(e) = plugin.on_register(&self.ctx).await {
            warn!(plugin = plugin.name(), error = %e, "Plugin on_register hook failed");
        }
        self.plugins.write().await.push(plugin);
    }

    pub async fn unregister(&self, name: &str) {
        let removed = {
            let mut plugins = self.plugins.write().await;
            let mut removed = None;
            plugins.retain(|p| {
                if p.name() == name {
                    removed = Some(p.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };
        if let Some(plugin) = removed {
            if let Err(e) = plugin.on_unregister(&self.ctx).await {
                warn!(plugin = name, error = %e, "Plugin on_unregister hook failed");
            }
        }
    }

    pub async fn plugin_count(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Run a hook across all plugins in registration order, collecting
    /// (not propagating) errors.
    async fn run_hook<F>(&self, hook: &str, invoke: F) -> Vec<String>
    where
        F: Fn(Arc<dyn SessionPlugin>, PluginContext) -> BoxFuture<'static, Result<()>>,
    {
        let plugins: Vec<Arc<dyn SessionPlugin>> = self.plugins.read().await.clone();
        let mut errors = Vec::new();
        for plugin in &plugins {
            if let Err(e) = invoke(plugin.clone(), self.ctx.clone()).await {
                warn!(plugin = plugin.name(), hook, error = %e, "Plugin hook failed");
                errors.push(format!("{}: {}", plugin.name(), e));
            }
        }
        errors
    }

    pub async fn on_initialize(&self) -> Vec<String> {
        self.run_hook("on_initialize", |p, ctx| {
            Box::pin(async move { p.on_initialize(&ctx).await })
        })
        .await
    }

    pub async fn before_files_generated(
        &self,
        phase_name: &str,
        concepts: &[FileConcept],
    ) -> Vec<String> {
        let phase_name = phase_name.to_string();
        let concepts = concepts.to_vec();
        self.run_hook("before_files_generated", move |p, ctx| {
            let phase_name = phase_name.clone();
            let concepts = concepts.clone();
            Box::pin(async move { p.before_files_generated(&ctx, &phase_name, &concepts).await })
        })
        .await
    }

    pub async fn after_files_generated(
        &self,
        phase_name: &str,
        outputs: &[FileRecord],
    ) -> Vec<String> {
        let phase_name = phase_name.to_string();
        let outputs = outputs.to_vec();
        self.run_hook("after_files_generated", move |p, ctx| {
            let phase_name = phase_name.clone();
            let outputs = outputs.clone();
            Box::pin(async move { p.after_files_generated(&ctx, &phase_name, &outputs).await })
        })
        .await
    }

    pub async fn before_deployment(&self) -> Vec<String> {
        self.run_hook("before_deployment", |p, ctx| {
            Box::pin(async move { p.before_deployment(&ctx).await })
        })
        .await
    }

    pub async fn after_deployment(&self, preview_url: &str) -> Vec<String> {
        let preview_url = preview_url.to_string();
        self.run_hook("after_deployment", move |p, ctx| {
            let preview_url = preview_url.clone();
            Box::pin(async move { p.after_deployment(&ctx, &preview_url).await })
        })
        .await
    }

    pub async fn on_generation_start(&self) -> Vec<String> {
        self.run_hook("on_generation_start", |p, ctx| {
            Box::pin(async move { p.on_generation_start(&ctx).await })
        })
        .await
    }

    pub async fn on_generation_complete(&self) -> Vec<String> {
        self.run_hook("on_generation_complete", |p, ctx| {
            Box::pin(async move { p.on_generation_complete(&ctx).await })
        })
        .await
    }

    pub async fn on_error(&self, error: &str, context: &str) -> Vec<String> {
        let error = error.to_string();
        let context = context.to_string();
        self.run_hook("on_error", move |p, ctx| {
            let error = error.clone();
            let context = context.clone();
            Box::pin(async move { p.on_error(&ctx, &error, &context).await })
        })
        .await
    }

    pub async fn on_state_update(
        &self,
        old: &serde_json::Value,
        new: &serde_json::Value,
    ) -> Vec<String> {
        let old = old.clone();
        let new = new.clone();
        self.run_hook("on_state_update", move |p, ctx| {
            let old = old.clone();
            let new = new.clone();
            Box::pin(async move { p.on_state_update(&ctx, &old, &new).await })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlugin {
        name: String,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl SessionPlugin for CountingPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_generation_start(&self, _ctx: &PluginContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AgentError::validation("hook failed"));
            }
            Ok(())
        }
    }

    fn manager() -> PluginManager {
        PluginManager::new(Uuid::now_v7(), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_noop() {
        let manager = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            manager
                .register(Arc::new(CountingPlugin {
                    name: "dup".to_string(),
                    calls: calls.clone(),
                    fail: false,
                }))
                .await;
        }
        assert_eq!(manager.plugin_count().await, 1);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_later_hooks() {
        let manager = manager();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        manager
            .register(Arc::new(CountingPlugin {
                name: "faulty".to_string(),
                calls: first.clone(),
                fail: true,
            }))
            .await;
        manager
            .register(Arc::new(CountingPlugin {
                name: "healthy".to_string(),
                calls: second.clone(),
                fail: false,
            }))
            .await;

        let errors = manager.on_generation_start().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("faulty:"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // Faulty plugin stays registered
        assert_eq!(manager.plugin_count().await, 2);
    }

    #[tokio::test]
    async fn test_unregister_removes_plugin() {
        let manager = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        manager
            .register(Arc::new(CountingPlugin {
                name: "p".to_string(),
                calls: calls.clone(),
                fail: false,
            }))
            .await;
        manager.unregister("p").await;
        assert_eq!(manager.plugin_count().await, 0);

        manager.on_generation_start().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
