//! Verify build/parse methods against JSON test vectors stored in `test-vectors/`.
//!
//! Each vector file describes inputs, expected requests, simulated responses,
//! and expected parse results or error messages. Bodies are compared as
//! parsed JSON so field ordering does not matter.

use appconfig_core::{
    ApiError, CreateOrUpdateKeyValueArgs, HttpMethod, HttpRequest, HttpResponse, KeyValue, KeyValueClient,
    KeyValues, ListKeyValuesArgs,
};

const BASE_URL: &str = "https://my-config.azconfig.io";

fn client() -> KeyValueClient {
    KeyValueClient::new(BASE_URL).unwrap()
}

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn load(raw: &str) -> Vec<serde_json::Value> {
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();
    vectors["cases"].as_array().unwrap().clone()
}

fn str_field<'a>(value: &'a serde_json::Value, name: &str) -> &'a str {
    value[name].as_str().unwrap_or_default()
}

fn simulated_response(case: &serde_json::Value) -> HttpResponse {
    let sim = &case["simulated_response"];
    HttpResponse {
        status: sim["status"].as_u64().unwrap() as u16,
        headers: Vec::new(),
        body: sim["body"].as_str().unwrap().to_string(),
    }
}

/// Compare method, URL and, when present in the vector, headers and body.
fn assert_request(name: &str, req: &HttpRequest, expected: &serde_json::Value) {
    assert_eq!(req.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
    assert_eq!(req.url, format!("{BASE_URL}{}", expected["path"].as_str().unwrap()), "{name}: url");

    if let Some(headers) = expected.get("headers") {
        let expected_headers: Vec<(String, String)> = headers
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let arr = h.as_array().unwrap();
                (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(req.headers, expected_headers, "{name}: headers");
    }

    match expected.get("body") {
        Some(body) => {
            let req_body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
            assert_eq!(&req_body, body, "{name}: body");
        }
        None => assert!(req.body.is_none(), "{name}: body should be None"),
    }
}

/// Check either the expected error message or the expected parsed value.
fn assert_outcome<T>(name: &str, case: &serde_json::Value, result: Result<T, ApiError>)
where
    T: serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    if let Some(expected_error) = case.get("expected_error") {
        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::HttpError { .. }), "{name}: expected HttpError");
        assert_eq!(err.to_string(), expected_error.as_str().unwrap(), "{name}: error message");
    } else {
        let value = result.unwrap();
        let expected: T = serde_json::from_value(case["expected_result"].clone()).unwrap();
        assert_eq!(value, expected, "{name}: parsed result");
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

#[test]
fn list_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/list.json")) {
        let name = case["name"].as_str().unwrap();
        let args = ListKeyValuesArgs {
            key: str_field(&case["input"], "key").to_string(),
            label: str_field(&case["input"], "label").to_string(),
        };

        let req = c.build_list_key_values(&args).unwrap();
        assert_request(name, &req, &case["expected_request"]);

        let result: Result<KeyValues, ApiError> = c.parse_list_key_values(simulated_response(&case));
        assert_outcome(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

#[test]
fn get_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/get.json")) {
        let name = case["name"].as_str().unwrap();
        let input = &case["input"];

        let req = c
            .build_get_key_value(str_field(input, "key"), str_field(input, "label"))
            .unwrap();
        assert_request(name, &req, &case["expected_request"]);

        let result: Result<KeyValue, ApiError> = c.parse_get_key_value(simulated_response(&case));
        assert_outcome(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Create or update
// ---------------------------------------------------------------------------

#[test]
fn create_or_update_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/create_or_update.json")) {
        let name = case["name"].as_str().unwrap();
        let input: CreateOrUpdateKeyValueArgs = serde_json::from_value(case["input"].clone()).unwrap();

        let req = c.build_create_or_update_key_value(&input).unwrap();
        assert_request(name, &req, &case["expected_request"]);

        let result: Result<KeyValue, ApiError> = c.parse_create_or_update_key_value(simulated_response(&case));
        assert_outcome(name, &case, result);
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[test]
fn delete_test_vectors() {
    let c = client();
    for case in load(include_str!("../../test-vectors/delete.json")) {
        let name = case["name"].as_str().unwrap();
        let input = &case["input"];

        let req = c
            .build_delete_key_value(str_field(input, "key"), str_field(input, "label"))
            .unwrap();
        assert_request(name, &req, &case["expected_request"]);

        let result = c.parse_delete_key_value(simulated_response(&case));
        if let Some(expected_error) = case.get("expected_error") {
            let err = result.unwrap_err();
            assert_eq!(err.to_string(), expected_error.as_str().unwrap(), "{name}: error message");
        } else {
            assert!(result.is_ok(), "{name}: expected success");
        }
    }
}
