//! Conversion plugin hooks
//!
//! Plugins observe and extend the build pipeline. Each stage that writes a
//! file exposes a pre-write hook receiving the stage's [`Resolver`] and an
//! `extra_src` buffer whose contents are appended to the generated module,
//! plus a post-write hook once the file is on disk. All hooks have no-op
//! defaults; implementations override the ones they care about.

use ruff_python_ast::ModModule;

use crate::{converter::Converter, resolver::Resolver};

#[allow(unused_variables)]
pub trait ConverterPlugin {
    /// Identifier used in log output
    fn name(&self) -> &str;

    /// Called once when the plugin is registered with a converter
    fn init(&mut self, converter: &mut Converter) {}

    fn build_start(&mut self, converter: &mut Converter) {}
    fn collect_imports(&mut self, converter: &mut Converter) {}
    fn build_project_done(&mut self, converter: &mut Converter) {}

    /// Customise the settings module tree before it is written
    fn build_settings(
        &mut self,
        converter: &mut Converter,
        resolver: &mut Resolver,
        settings: &mut ModModule,
    ) {
    }
    fn build_settings_done(&mut self, converter: &mut Converter) {}

    fn copy_assets(&mut self, converter: &mut Converter) {}
    fn build_app_templates(&mut self, converter: &mut Converter) {}

    fn build_app_models(
        &mut self,
        converter: &mut Converter,
        resolver: &mut Resolver,
        extra_src: &mut Vec<String>,
    ) {
    }
    fn build_app_models_done(&mut self, converter: &mut Converter) {}

    fn build_app_views(
        &mut self,
        converter: &mut Converter,
        resolver: &mut Resolver,
        extra_src: &mut Vec<String>,
    ) {
    }
    fn build_app_views_done(&mut self, converter: &mut Converter) {}

    fn build_app_api(
        &mut self,
        converter: &mut Converter,
        resolver: &mut Resolver,
        extra_src: &mut Vec<String>,
    ) {
    }
    fn build_app_api_done(&mut self, converter: &mut Converter) {}

    fn build_app_urls(
        &mut self,
        converter: &mut Converter,
        resolver: &mut Resolver,
        extra_src: &mut Vec<String>,
    ) {
    }
    fn build_app_urls_done(&mut self, converter: &mut Converter) {}

    /// Customise the project urlconf source before it is written
    fn build_urls(&mut self, converter: &mut Converter, src: &mut Vec<String>) {}
    fn build_urls_done(&mut self, converter: &mut Converter) {}

    fn build_app_admin(
        &mut self,
        converter: &mut Converter,
        resolver: &mut Resolver,
        extra_src: &mut Vec<String>,
    ) {
    }
    fn build_app_admin_done(&mut self, converter: &mut Converter) {}

    fn build_app_unused(
        &mut self,
        converter: &mut Converter,
        resolver: &mut Resolver,
        extra_src: &mut Vec<String>,
    ) {
    }

    fn build_end(&mut self, converter: &mut Converter) {}
}

/// Dispatches each hook to every registered plugin, in registration order
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Box<dyn ConverterPlugin>>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|plugin| plugin.name()))
            .finish()
    }
}

macro_rules! dispatch {
    ($name:ident $(, $arg:ident: $ty:ty)*) => {
        pub fn $name(&mut self, converter: &mut Converter $(, $arg: $ty)*) {
            for plugin in &mut self.plugins {
                log::debug!("plugin {}: {}", plugin.name(), stringify!($name));
                plugin.$name(converter $(, $arg)*);
            }
        }
    };
}

impl PluginManager {
    pub fn register(&mut self, plugin: Box<dyn ConverterPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    dispatch!(build_start);
    dispatch!(collect_imports);
    dispatch!(build_project_done);
    dispatch!(build_settings, resolver: &mut Resolver, settings: &mut ModModule);
    dispatch!(build_settings_done);
    dispatch!(copy_assets);
    dispatch!(build_app_templates);
    dispatch!(build_app_models, resolver: &mut Resolver, extra_src: &mut Vec<String>);
    dispatch!(build_app_models_done);
    dispatch!(build_app_views, resolver: &mut Resolver, extra_src: &mut Vec<String>);
    dispatch!(build_app_views_done);
    dispatch!(build_app_api, resolver: &mut Resolver, extra_src: &mut Vec<String>);
    dispatch!(build_app_api_done);
    dispatch!(build_app_urls, resolver: &mut Resolver, extra_src: &mut Vec<String>);
    dispatch!(build_app_urls_done);
    dispatch!(build_urls, src: &mut Vec<String>);
    dispatch!(build_urls_done);
    dispatch!(build_app_admin, resolver: &mut Resolver, extra_src: &mut Vec<String>);
    dispatch!(build_app_admin_done);
    dispatch!(build_app_unused, resolver: &mut Resolver, extra_src: &mut Vec<String>);
    dispatch!(build_end);
}
