//! connector plugins command

use clap::Args;
use console::style;
use controller::Connector;
use link::{default_plugins, PluginInfo, RecordingTransport};
use shared::ConnectorConfig;
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct PluginsCommand {
    /// Also list the configuration properties of every plugin
    #[arg(long)]
    pub schema: bool,
}

/// Catalog of the plugins shipped with the connector
pub fn catalog() -> anyhow::Result<Vec<PluginInfo>> {
    let connector = Connector::new(ConnectorConfig::default(), default_plugins(Arc::new(RecordingTransport::new())))?;
    Ok(connector.plugin_infos())
}

impl PluginsCommand {
    pub fn run(&self, json: bool) -> anyhow::Result<()> {
        let plugins = catalog()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&plugins)?);
            return Ok(());
        }

        println!("Available link plugins:");
        for plugin in &plugins {
            println!();
            println!("  {}", style(&plugin.name).bold());
            println!("    link types: {:?}", plugin.link_types);
            println!("    features:   {:?}", plugin.features);
            if self.schema {
                for class in &plugin.config_schema {
                    println!("    {} ({:?}, prefix '{}')", class.name, class.level, class.prefix);
                    for property in &class.properties {
                        let required = if property.required { "required" } else { "optional" };
                        println!("      {:<24} {:<8} {}", property.key, required, property.description);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lists_shipped_plugins() {
        let names: Vec<_> = catalog().unwrap().into_iter().map(|p| p.name).collect();
        assert!(names.contains(&"wsbackendplugin".to_string()));
        assert!(names.contains(&"gwwspullplugin".to_string()));
        assert!(names.contains(&"testbackend".to_string()));
    }
}
