use cairn_types::{CairnError, Key, KeyValue, Value};

use crate::header::ResponseHeader;
use crate::request::Method;
use crate::union::ResponseUnion;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContainsResponse {
    pub header: ResponseHeader,
    pub exists: bool,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GetResponse {
    pub header: ResponseHeader,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PutResponse {
    pub header: ResponseHeader,
}

/// `actual_value` is the value found when the condition did not hold.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConditionalPutResponse {
    pub header: ResponseHeader,
    pub actual_value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IncrementResponse {
    pub header: ResponseHeader,
    pub new_value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeleteResponse {
    pub header: ResponseHeader,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeleteRangeResponse {
    pub header: ResponseHeader,
    pub num_deleted: i64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanResponse {
    pub header: ResponseHeader,
    pub rows: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EndTransactionResponse {
    pub header: ResponseHeader,
    /// Nanoseconds the client must wait before reporting the commit.
    pub commit_wait: i64,
    /// Intent keys resolved as part of the commit or abort.
    pub resolved: Vec<Key>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatchResponse {
    pub header: ResponseHeader,
    pub responses: Vec<ResponseUnion>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdminSplitResponse {
    pub header: ResponseHeader,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdminMergeResponse {
    pub header: ResponseHeader,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Response {
    Contains(ContainsResponse),
    Get(GetResponse),
    Put(PutResponse),
    ConditionalPut(ConditionalPutResponse),
    Increment(IncrementResponse),
    Delete(DeleteResponse),
    DeleteRange(DeleteRangeResponse),
    Scan(ScanResponse),
    EndTransaction(EndTransactionResponse),
    Batch(BatchResponse),
    AdminSplit(AdminSplitResponse),
    AdminMerge(AdminMergeResponse),
}

macro_rules! response_header {
    ($resp:expr, $r:ident => $body:expr) => {
        match $resp {
            Response::Contains($r) => $body,
            Response::Get($r) => $body,
            Response::Put($r) => $body,
            Response::ConditionalPut($r) => $body,
            Response::Increment($r) => $body,
            Response::Delete($r) => $body,
            Response::DeleteRange($r) => $body,
            Response::Scan($r) => $body,
            Response::EndTransaction($r) => $body,
            Response::Batch($r) => $body,
            Response::AdminSplit($r) => $body,
            Response::AdminMerge($r) => $body,
        }
    };
}

impl Response {
    /// An empty response of the kind that answers `method`.
    pub fn new_for(method: Method) -> Self {
        match method {
            Method::Contains => Response::Contains(Default::default()),
            Method::Get => Response::Get(Default::default()),
            Method::Put => Response::Put(Default::default()),
            Method::ConditionalPut => Response::ConditionalPut(Default::default()),
            Method::Increment => Response::Increment(Default::default()),
            Method::Delete => Response::Delete(Default::default()),
            Method::DeleteRange => Response::DeleteRange(Default::default()),
            Method::Scan => Response::Scan(Default::default()),
            Method::EndTransaction => Response::EndTransaction(Default::default()),
            Method::Batch => Response::Batch(Default::default()),
            Method::AdminSplit => Response::AdminSplit(Default::default()),
            Method::AdminMerge => Response::AdminMerge(Default::default()),
        }
    }

    pub fn error_for(method: Method, err: CairnError) -> Self {
        let mut resp = Self::new_for(method);
        resp.header_mut().set_error(err);
        resp
    }

    pub fn header(&self) -> &ResponseHeader {
        response_header!(self, r => &r.header)
    }

    pub fn header_mut(&mut self) -> &mut ResponseHeader {
        response_header!(self, r => &mut r.header)
    }

    pub fn error(&self) -> Option<&CairnError> {
        self.header().error.as_ref()
    }

    pub fn method(&self) -> Method {
        match self {
            Response::Contains(_) => Method::Contains,
            Response::Get(_) => Method::Get,
            Response::Put(_) => Method::Put,
            Response::ConditionalPut(_) => Method::ConditionalPut,
            Response::Increment(_) => Method::Increment,
            Response::Delete(_) => Method::Delete,
            Response::DeleteRange(_) => Method::DeleteRange,
            Response::Scan(_) => Method::Scan,
            Response::EndTransaction(_) => Method::EndTransaction,
            Response::Batch(_) => Method::Batch,
            Response::AdminSplit(_) => Method::AdminSplit,
            Response::AdminMerge(_) => Method::AdminMerge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_for_keeps_kind() {
        let resp = Response::error_for(Method::Scan, CairnError::InvalidArgument("bad".into()));
        assert_eq!(resp.method(), Method::Scan);
        assert!(matches!(resp.error(), Some(CairnError::InvalidArgument(_))));
        match resp {
            Response::Scan(s) => assert!(s.rows.is_empty()),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn encoded_response_is_stable() {
        let mut resp = Response::new_for(Method::Increment);
        if let Response::Increment(r) = &mut resp {
            r.new_value = 5;
        }
        let cfg = bincode::config::standard();
        let a = bincode::serde::encode_to_vec(&resp, cfg).unwrap();
        let (back, _): (Response, usize) = bincode::serde::decode_from_slice(&a, cfg).unwrap();
        let b = bincode::serde::encode_to_vec(&back, cfg).unwrap();
        assert_eq!(a, b);
    }
}
