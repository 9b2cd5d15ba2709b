//! Media runtime and its shared native singletons
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use roomlink_config::SdkConfig;
use roomlink_types::RawHandle;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::error::LifecycleResult;
use crate::handle::NativeResource;
use crate::native::{NativeEngine, NativeRequest};
use crate::singleton::{OwnerToken, RefCountedSingleton, SharedNative, SingletonLease};

/// Native media factory every track and room is created from
pub struct MediaFactory {
    native: NativeResource,
}

impl MediaFactory {
    pub fn raw(&self) -> LifecycleResult<RawHandle> {
        self.native.raw()
    }
}

impl SharedNative for MediaFactory {
    fn destroy(&self) -> LifecycleResult<()> {
        self.native.release().map(|_| ())
    }
}

/// Shared render context used by video tracks
pub struct RenderContext {
    native: NativeResource,
}

impl RenderContext {
    pub fn raw(&self) -> LifecycleResult<RawHandle> {
        self.native.raw()
    }
}

impl SharedNative for RenderContext {
    fn destroy(&self) -> LifecycleResult<()> {
        self.native.release().map(|_| ())
    }
}

/// Runtime behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Video tracks acquire the shared render context
    pub share_render_context: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            share_render_context: true,
        }
    }
}

impl From<&SdkConfig> for RuntimeOptions {
    fn from(config: &SdkConfig) -> Self {
        Self {
            share_render_context: config.share_render_context,
        }
    }
}

/// Owns the native engine and the process-wide shared objects built on it.
///
/// Several runtimes can coexist; each has its own singletons.
pub struct MediaRuntime {
    engine: Arc<dyn NativeEngine>,
    options: RuntimeOptions,
    media_factory: Arc<RefCountedSingleton<MediaFactory>>,
    render_context: Arc<RefCountedSingleton<RenderContext>>,
}

impl MediaRuntime {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Arc<Self> {
        Self::with_options(engine, RuntimeOptions::default())
    }

    pub fn with_options(engine: Arc<dyn NativeEngine>, options: RuntimeOptions) -> Arc<Self> {
        let factory_engine = engine.clone();
        let media_factory = Arc::new(RefCountedSingleton::new("media_factory", move || {
            let native = NativeResource::create(factory_engine.clone(), NativeRequest::MediaFactory)?;
            Ok(MediaFactory { native })
        }));

        let context_engine = engine.clone();
        let render_context = Arc::new(RefCountedSingleton::new("render_context", move || {
            let native = NativeResource::create(context_engine.clone(), NativeRequest::RenderContext)?;
            Ok(RenderContext { native })
        }));

        info!(
            share_render_context = options.share_render_context,
            "Media runtime created"
        );

        Arc::new(Self {
            engine,
            options,
            media_factory,
            render_context,
        })
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn options(&self) -> RuntimeOptions {
        self.options
    }

    pub fn media_factory(&self) -> &Arc<RefCountedSingleton<MediaFactory>> {
        &self.media_factory
    }

    pub fn render_context(&self) -> &Arc<RefCountedSingleton<RenderContext>> {
        &self.render_context
    }

    pub(crate) fn lease_media_factory(&self, owner: OwnerToken) -> LifecycleResult<SingletonLease<MediaFactory>> {
        self.media_factory.lease(owner)
    }

    pub(crate) fn lease_render_context(&self, owner: OwnerToken) -> LifecycleResult<SingletonLease<RenderContext>> {
        self.render_context.lease(owner)
    }

    pub fn media_factory_count(&self) -> usize {
        self.media_factory.count()
    }

    pub fn render_context_count(&self) -> usize {
        self.render_context.count()
    }

    /// Clamped releases across both singletons
    pub fn underflows(&self) -> u64 {
        self.media_factory.underflows() + self.render_context.underflows()
    }
}

impl fmt::Debug for MediaRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaRuntime")
            .field("options", &self.options)
            .field("media_factory_count", &self.media_factory_count())
            .field("render_context_count", &self.render_context_count())
            .finish()
    }
}
