//! Run-command templates.
//!
//! A pure, immutable mapping from a project's declared template to the shell
//! command that starts it. Unknown templates are a hard error; there is no
//! fallback command.

use std::collections::HashMap;

use super::SessionError;

/// Built-in template table, extensible from configuration.
pub struct RunCommandTable {
    commands: HashMap<String, String>,
}

impl RunCommandTable {
    /// Build the table from the built-in defaults plus config overrides.
    pub fn new(extra: &HashMap<String, String>) -> Self {
        let mut commands: HashMap<String, String> = [
            ("create-react-vite", "npm install && npm run dev"),
            ("intermediate-front-week-0", "npm install && npm run dev"),
            ("create-spring-boot", "./gradlew bootRun"),
            ("create-python-basic", "python main.py"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        for (key, value) in extra {
            commands.insert(key.clone(), value.clone());
        }

        Self { commands }
    }

    /// Resolve the run command for a template key.
    pub fn resolve(&self, template: &str) -> Result<&str, SessionError> {
        self.commands
            .get(template)
            .map(String::as_str)
            .ok_or_else(|| SessionError::UnknownTemplate(template.to_string()))
    }
}

impl Default for RunCommandTable {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}
