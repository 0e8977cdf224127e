//! Single-field reads from `Secret` and `ConfigMap` style objects.
//!
//! Both keep their payload under `data`; secret values are base64 encoded.
//! These are plain reads and are never retried.

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    client::Client,
    error::{Error, Result},
    object::ObjectRef,
    store::ObjectStore,
};

pub const SECRET_KIND: &str = "Secret";
pub const CONFIG_KIND: &str = "ConfigMap";

impl<S: ObjectStore> Client<S> {
    /// The decoded bytes of `data.<field>` of a secret.
    pub async fn get_secret_field(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        name: &str,
        field: &str,
    ) -> Result<Vec<u8>> {
        let key = ObjectRef::new(SECRET_KIND, namespace, name);
        let encoded = self.get_data_field(cancel, &key, field).await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::MalformedField {
                key,
                field: field.to_owned(),
                source: e.into(),
            })
    }

    /// The text of `data.<field>` of a config object.
    pub async fn get_config_field(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        name: &str,
        field: &str,
    ) -> Result<String> {
        let key = ObjectRef::new(CONFIG_KIND, namespace, name);
        self.get_data_field(cancel, &key, field).await
    }

    /// `data.<field>` of a config object, parsed as YAML (and so JSON) into `D`.
    pub async fn get_config_field_yaml<D: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        name: &str,
        field: &str,
    ) -> Result<D> {
        let key = ObjectRef::new(CONFIG_KIND, namespace, name);
        let text = self.get_data_field(cancel, &key, field).await?;
        serde_yaml::from_str(&text).map_err(|e| Error::MalformedField {
            key,
            field: field.to_owned(),
            source: e.into(),
        })
    }

    async fn get_data_field(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        field: &str,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { key: key.clone() });
        }
        let doc = self.get(key).await?;
        let empty = || Error::EmptyField {
            key: key.clone(),
            field: field.to_owned(),
        };
        match doc.get("data").and_then(|data| data.get(field)) {
            None | Some(Value::Null) => Err(empty()),
            Some(Value::String(s)) if s.is_empty() => Err(empty()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(Error::MalformedField {
                key: key.clone(),
                field: field.to_owned(),
                source: "field value is not a string".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::{error::ErrorKind, store::memory::MemoryStore};

    async fn client() -> Client<MemoryStore> {
        let store = MemoryStore::new();
        store
            .create(
                &ObjectRef::new(SECRET_KIND, "ns", "creds"),
                json!({"data": {"token": "aHVudGVyMg==", "blank": "", "garbage": "%%%"}}),
            )
            .await
            .unwrap();
        store
            .create(
                &ObjectRef::new(CONFIG_KIND, "ns", "settings"),
                json!({"data": {
                    "limits": "cpu: 2\nmemory: 1Gi\n",
                    "broken": "cpu: [2",
                    "count": 3
                }}),
            )
            .await
            .unwrap();
        store
            .create(&ObjectRef::new(CONFIG_KIND, "ns", "bare"), json!({}))
            .await
            .unwrap();
        Client::new(store)
    }

    #[tokio::test]
    async fn secret_field_is_decoded() {
        let client = client().await;
        let cancel = CancellationToken::new();
        let token = client
            .get_secret_field(&cancel, "ns", "creds", "token")
            .await
            .unwrap();
        assert_eq!(token, b"hunter2");

        let err = client
            .get_secret_field(&cancel, "ns", "creds", "garbage")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn empty_or_absent_fields_are_errors() {
        let client = client().await;
        let cancel = CancellationToken::new();
        for (name, field) in [("creds", "blank"), ("creds", "missing")] {
            let err = client
                .get_secret_field(&cancel, "ns", name, field)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EmptyField, "{}", field);
        }
        let err = client
            .get_config_field(&cancel, "ns", "bare", "anything")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyField);
    }

    #[tokio::test]
    async fn missing_parent_is_not_found() {
        let client = client().await;
        let err = client
            .get_config_field(&CancellationToken::new(), "ns", "nope", "limits")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn config_field_as_text_and_yaml() {
        let client = client().await;
        let cancel = CancellationToken::new();
        let text = client
            .get_config_field(&cancel, "ns", "settings", "limits")
            .await
            .unwrap();
        assert_eq!(text, "cpu: 2\nmemory: 1Gi\n");

        let limits: BTreeMap<String, serde_yaml::Value> = client
            .get_config_field_yaml(&cancel, "ns", "settings", "limits")
            .await
            .unwrap();
        assert_eq!(limits["memory"], serde_yaml::Value::from("1Gi"));

        let err = client
            .get_config_field_yaml::<BTreeMap<String, u32>>(&cancel, "ns", "settings", "broken")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);

        let err = client
            .get_config_field(&cancel, "ns", "settings", "count")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }
}
