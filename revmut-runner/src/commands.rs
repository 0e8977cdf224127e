//! The operations behind the subcommands. Each returns the JSON to print.

use anyhow::{bail, Context, Result};
use revmut::{
    Applied, CancellationToken, Client, DynamicObject, ObjectRef, ObjectStore, Outcome,
};
use serde_json::{json, Value};

/// How `field` reads its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    /// Base64 data of a secret, printed as text.
    Secret,
    /// Text of a config object.
    Config,
    /// Text of a config object, parsed as YAML.
    ConfigYaml,
}

pub async fn get<S: ObjectStore>(
    client: &Client<S>,
    key: &ObjectRef,
) -> Result<Value> {
    client
        .store()
        .get(key)
        .await
        .map_err(|e| revmut::Error::from_store(key, e))
        .with_context(|| format!("Could not get {}", key))
}

/// Create the object described by `body` unless it exists.
pub async fn create<S: ObjectStore>(
    client: &Client<S>,
    cancel: &CancellationToken,
    key: &ObjectRef,
    body: Value,
) -> Result<Value> {
    let object = object_from_body(key, body)?;
    let outcome = client.create_if_absent(cancel, key, &object).await?;
    Ok(json!({ "outcome": outcome }))
}

/// Make the object's content (everything but its identity and version) equal
/// to `body`, writing the whole document.
pub async fn apply<S: ObjectStore>(
    client: &Client<S>,
    cancel: &CancellationToken,
    key: &ObjectRef,
    body: Value,
    create: bool,
) -> Result<Value> {
    let desired = object_from_body(key, body)?;
    let mutate = |object: &mut DynamicObject| {
        object.fields = desired.fields.clone();
        object.metadata.labels = desired.metadata.labels.clone();
        object.metadata.annotations = desired.metadata.annotations.clone();
        Ok(())
    };
    let applied = if create {
        client.create_or_update(cancel, key, mutate).await?
    } else {
        client.fetch_and_update(cancel, key, mutate).await?
    };
    applied_json(applied)
}

/// Merge `patch` (RFC 7396) into the object, then write the body and status
/// changes as JSON patches.
pub async fn merge<S: ObjectStore>(
    client: &Client<S>,
    cancel: &CancellationToken,
    key: &ObjectRef,
    patch: Value,
    create: bool,
) -> Result<Value> {
    let mutate = |object: &mut DynamicObject| merge_into(object, &patch);
    let applied = if create {
        client.create_or_patch(cancel, key, mutate).await?
    } else {
        client.fetch_and_patch(cancel, key, mutate).await?
    };
    applied_json(applied)
}

/// Merge `patch` into the object, creating it if needed, and send the result
/// as one merge patch.
pub async fn merge_patch<S: ObjectStore>(
    client: &Client<S>,
    cancel: &CancellationToken,
    key: &ObjectRef,
    patch: Value,
) -> Result<Value> {
    let applied = client
        .create_or_merge_patch(cancel, key, |object: &mut DynamicObject| {
            merge_into(object, &patch)
        })
        .await?;
    applied_json(applied)
}

pub async fn set_status<S: ObjectStore>(
    client: &Client<S>,
    cancel: &CancellationToken,
    key: &ObjectRef,
    status: Value,
) -> Result<Value> {
    let applied = client
        .fetch_and_patch(cancel, key, |object: &mut DynamicObject| {
            *object.status_mut() = status.clone();
            Ok(())
        })
        .await?;
    applied_json(applied)
}

pub async fn field<S: ObjectStore>(
    client: &Client<S>,
    cancel: &CancellationToken,
    namespace: &str,
    name: &str,
    field: &str,
    format: FieldFormat,
) -> Result<Value> {
    let value = match format {
        FieldFormat::Secret => {
            let bytes = client.get_secret_field(cancel, namespace, name, field).await?;
            Value::String(
                String::from_utf8(bytes)
                    .with_context(|| format!("Secret field {} is not UTF-8 text", field))?,
            )
        }
        FieldFormat::Config => {
            Value::String(client.get_config_field(cancel, namespace, name, field).await?)
        }
        FieldFormat::ConfigYaml => {
            client
                .get_config_field_yaml(cancel, namespace, name, field)
                .await?
        }
    };
    Ok(value)
}

/// Parse a command line body into an object, filling in its identity from
/// `key` where the body leaves it out.
pub fn object_from_body(key: &ObjectRef, body: Value) -> Result<DynamicObject> {
    if !body.is_object() {
        bail!("The body of {} must be a JSON object", key);
    }
    let mut object: DynamicObject =
        serde_json::from_value(body).with_context(|| format!("Invalid body for {}", key))?;
    if object.metadata.namespace.is_empty() {
        object.metadata.namespace = key.namespace.clone();
    }
    if object.metadata.name.is_empty() {
        object.metadata.name = key.name.clone();
    }
    object.metadata.resource_version = None;
    Ok(object)
}

fn merge_into(object: &mut DynamicObject, patch: &Value) -> Result<()> {
    let mut tree = serde_json::to_value(&*object)?;
    json_patch::merge(&mut tree, patch);
    *object = serde_json::from_value(tree).context("Merging produced an invalid object")?;
    Ok(())
}

fn applied_json(applied: Applied<DynamicObject>) -> Result<Value> {
    Ok(json!({
        "outcome": applied.outcome,
        "changed": applied.outcome != Outcome::NoChange,
        "object": serde_json::to_value(&applied.object)?,
    }))
}
