use std::path::Path;

use fleet_common::{InstanceRecord, ProvisionError};
use minijinja::{Environment, UndefinedBehavior, Value};

/// Read a cloud-config template and render it against `record`.
pub async fn render_file(path: &Path, record: &InstanceRecord) -> Result<Vec<u8>, ProvisionError> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProvisionError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
    render(path, &source, record).map(String::into_bytes)
}

/// Render `source` with the record's fields (`{{ name }}`, `{{ region }}`, ...) as context.
/// Unknown references are errors.
pub fn render(path: &Path, source: &str, record: &InstanceRecord) -> Result<String, ProvisionError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);

    env.render_str(source, Value::from_serialize(record))
        .map_err(|e| ProvisionError::TemplateRender {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}
