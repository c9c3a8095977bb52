//! 查询串解析：一个请求恰好对应一个操作。

use axum::http::Method;
use percent_encoding::percent_decode_str;

use crate::error::ApiError;

const MODEL_NAME_PREFIX: &str = "modelName=";

/// The single action named by a request's query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Model(String),
    ListModels,
    ResetModels,
    UploadResults,
    ViewResults,
    ResetResults,
}

/// An action paired with the HTTP method that selects what it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    PutModel(String),
    GetModel(String),
    ListModels,
    ResetModels,
    UploadResult,
    ViewResults,
    ResetResults,
}

/// 解析原始查询串；要求恰好一个非空参数。
pub fn parse_action(raw_query: Option<&str>) -> Result<Action, ApiError> {
    let mut tokens = raw_query
        .unwrap_or_default()
        .split('&')
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let (Some(token), None) = (tokens.next(), tokens.next()) else {
        return Err(ApiError::BadRequest(
            "Exactly one query parameter is required".into(),
        ));
    };

    if let Some(prefix) = token.get(..MODEL_NAME_PREFIX.len())
        && prefix.eq_ignore_ascii_case(MODEL_NAME_PREFIX)
    {
        let value = &token[MODEL_NAME_PREFIX.len()..];
        let name = percent_decode_str(value)
            .decode_utf8()
            .map_err(|_| ApiError::BadRequest("'modelName' is not valid UTF-8".into()))?
            .trim()
            .to_string();
        if name.is_empty() {
            return Err(ApiError::BadRequest(
                "Missing or empty 'modelName' parameter".into(),
            ));
        }
        return Ok(Action::Model(name));
    }

    const FLAGS: [(&str, Action); 5] = [
        ("listModels", Action::ListModels),
        ("resetModels", Action::ResetModels),
        ("uploadResults", Action::UploadResults),
        ("viewResults", Action::ViewResults),
        ("resetResults", Action::ResetResults),
    ];
    FLAGS
        .into_iter()
        .find(|(flag, _)| flag.eq_ignore_ascii_case(token))
        .map(|(_, action)| action)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid query parameter '{token}'")))
}

impl Action {
    /// 结合 HTTP 方法确定具体操作，方法不匹配时返回 405。
    pub fn with_method(self, method: &Method) -> Result<Operation, ApiError> {
        let (expected, operation, query_name) = match self {
            Action::Model(name) => {
                return match *method {
                    Method::PUT => Ok(Operation::PutModel(name)),
                    Method::GET => Ok(Operation::GetModel(name)),
                    _ => Err(ApiError::MethodNotAllowed(
                        "Only 'PUT' and 'GET' requests are allowed".into(),
                    )),
                };
            }
            Action::ListModels => (Method::GET, Operation::ListModels, "listModels"),
            Action::ResetModels => (Method::DELETE, Operation::ResetModels, "resetModels"),
            Action::UploadResults => (Method::POST, Operation::UploadResult, "uploadResults"),
            Action::ViewResults => (Method::GET, Operation::ViewResults, "viewResults"),
            Action::ResetResults => (Method::DELETE, Operation::ResetResults, "resetResults"),
        };

        if *method != expected {
            return Err(ApiError::MethodNotAllowed(format!(
                "Only '{expected}' requests are allowed for '{query_name}'"
            )));
        }
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad_request(result: Result<Action, ApiError>) -> String {
        match result {
            Err(ApiError::BadRequest(msg)) => msg,
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn parses_each_flag_case_insensitively() {
        assert_eq!(parse_action(Some("listModels")).ok(), Some(Action::ListModels));
        assert_eq!(parse_action(Some("RESETMODELS")).ok(), Some(Action::ResetModels));
        assert_eq!(parse_action(Some("uploadresults")).ok(), Some(Action::UploadResults));
        assert_eq!(parse_action(Some("viewResults")).ok(), Some(Action::ViewResults));
        assert_eq!(parse_action(Some("resetResults")).ok(), Some(Action::ResetResults));
    }

    #[test]
    fn parses_model_name_with_decoding() {
        assert_eq!(
            parse_action(Some("modelName=weights.bin")).ok(),
            Some(Action::Model("weights.bin".into()))
        );
        assert_eq!(
            parse_action(Some("MODELNAME=my%20model.onnx")).ok(),
            Some(Action::Model("my model.onnx".into()))
        );
        assert_eq!(
            parse_action(Some("modelName=..%2Fsecret")).ok(),
            Some(Action::Model("../secret".into()))
        );
    }

    #[test]
    fn ignores_empty_tokens_and_whitespace() {
        assert_eq!(parse_action(Some("&listModels&&")).ok(), Some(Action::ListModels));
        assert_eq!(parse_action(Some(" viewResults ")).ok(), Some(Action::ViewResults));
    }

    #[test]
    fn requires_exactly_one_parameter() {
        let msg = bad_request(parse_action(None));
        assert_eq!(msg, "Exactly one query parameter is required");
        bad_request(parse_action(Some("")));
        bad_request(parse_action(Some("&&")));
        bad_request(parse_action(Some("modelName=x&listModels")));
    }

    #[test]
    fn rejects_unknown_and_empty_parameters() {
        let msg = bad_request(parse_action(Some("unknownAction")));
        assert!(msg.contains("unknownAction"));
        bad_request(parse_action(Some("listModels=1")));
        bad_request(parse_action(Some("fileName=x")));
        bad_request(parse_action(Some("modelName=")));
        bad_request(parse_action(Some("modelName")));
        bad_request(parse_action(Some("modelName=%FF")));
        bad_request(parse_action(Some("é")));
    }

    #[test]
    fn model_action_picks_operation_from_method() {
        let action = Action::Model("m".into());
        assert_eq!(
            action.clone().with_method(&Method::PUT).ok(),
            Some(Operation::PutModel("m".into()))
        );
        assert_eq!(
            action.clone().with_method(&Method::GET).ok(),
            Some(Operation::GetModel("m".into()))
        );
        assert!(matches!(
            action.with_method(&Method::DELETE),
            Err(ApiError::MethodNotAllowed(_))
        ));
    }

    #[test]
    fn flag_actions_require_their_method() {
        let cases = [
            (Action::ListModels, Method::GET, Operation::ListModels),
            (Action::ResetModels, Method::DELETE, Operation::ResetModels),
            (Action::UploadResults, Method::POST, Operation::UploadResult),
            (Action::ViewResults, Method::GET, Operation::ViewResults),
            (Action::ResetResults, Method::DELETE, Operation::ResetResults),
        ];
        for (action, method, operation) in cases {
            assert_eq!(action.clone().with_method(&method).ok(), Some(operation));
            assert!(matches!(
                action.with_method(&Method::PATCH),
                Err(ApiError::MethodNotAllowed(_))
            ));
        }

        let result = Action::ResetModels.with_method(&Method::GET);
        match result {
            Err(ApiError::MethodNotAllowed(msg)) => {
                assert_eq!(msg, "Only 'DELETE' requests are allowed for 'resetModels'")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
