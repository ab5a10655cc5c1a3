//! Parameter encoding
//!
//! Parameters reach storage as strings no matter how they arrived: v1 name/value
//! lists become `[{"name":..,"value":..}]`, v2 runtime maps become a JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dto::v1beta1;
use crate::error::{Error, Result};

/// Stored form of a single v1 parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Serialize v1 parameters; an empty list is stored as an empty string
pub fn api_parameters_to_model(parameters: &[v1beta1::Parameter]) -> Result<String> {
    if parameters.is_empty() {
        return Ok(String::new());
    }
    let params: Vec<SpecParameter> = parameters
        .iter()
        .map(|p| SpecParameter {
            name: p.name.clone(),
            value: Some(p.value.clone()),
        })
        .collect();
    serde_json::to_string(&params)
        .map_err(|e| Error::internal(e, "Failed to stream API v1 parameters as a string"))
}

/// Parse stored v1 parameters back into the wire list
pub fn model_parameters_to_api(parameters: &str) -> Result<Vec<v1beta1::Parameter>> {
    if parameters.is_empty() {
        return Ok(Vec::new());
    }
    let params: Vec<SpecParameter> = serde_json::from_str(parameters)
        .map_err(|e| Error::internal(e, "Parameter with wrong format is stored"))?;
    Ok(params
        .into_iter()
        .map(|p| v1beta1::Parameter {
            name: p.name,
            value: p.value.unwrap_or_default(),
        })
        .collect())
}

/// Serialize a v2 runtime parameter map
pub fn runtime_parameters_to_model(parameters: &Map<String, Value>) -> Result<String> {
    if parameters.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(parameters)
        .map_err(|e| Error::internal(e, "Failed to marshal RuntimeConfig's parameters as a string"))
}

/// Parse a stored v2 runtime parameter map
pub fn model_runtime_parameters(parameters: &str) -> Result<Map<String, Value>> {
    if parameters.is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(parameters).map_err(|e| {
        Error::internal(
            e,
            format!("Cannot unmarshal RuntimeConfig parameters, string value: {parameters}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_v1_parameters_encoding() {
        let params = vec![v1beta1::Parameter {
            name: "x".into(),
            value: "1".into(),
        }];
        let encoded = api_parameters_to_model(&params).unwrap();
        assert_eq!(encoded, r#"[{"name":"x","value":"1"}]"#);
        assert_eq!(model_parameters_to_api(&encoded).unwrap(), params);
    }

    #[test]
    fn test_empty_parameters_are_empty_string() {
        assert_eq!(api_parameters_to_model(&[]).unwrap(), "");
        assert_eq!(runtime_parameters_to_model(&Map::new()).unwrap(), "");
        assert!(model_parameters_to_api("").unwrap().is_empty());
    }

    #[test]
    fn test_runtime_parameters_encoding() {
        let mut map = Map::new();
        map.insert("param2".into(), Value::String("world".into()));
        assert_eq!(runtime_parameters_to_model(&map).unwrap(), r#"{"param2":"world"}"#);
    }

    #[test]
    fn test_stored_garbage_is_internal() {
        let err = model_parameters_to_api("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        let err = model_runtime_parameters("[1,2]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_parameter_without_value() {
        let params = model_parameters_to_api(r#"[{"name":"a"}]"#).unwrap();
        assert_eq!(params[0].value, "");
    }
}
