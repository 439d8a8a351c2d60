//! Batch elements: one optional slot per batchable operation kind.
//!
//! Exactly one slot must be set. Anything else is rejected before the batch
//! executes.

use cairn_types::CairnError;

use crate::request::{
    ConditionalPutRequest, ContainsRequest, DeleteRangeRequest, DeleteRequest,
    EndTransactionRequest, GetRequest, IncrementRequest, PutRequest, Request, ScanRequest,
};
use crate::response::{
    ConditionalPutResponse, ContainsResponse, DeleteRangeResponse, DeleteResponse,
    EndTransactionResponse, GetResponse, IncrementResponse, PutResponse, Response, ScanResponse,
};

macro_rules! define_union {
    (
        $union:ident, $enum:ident {
            $($field:ident: $variant:ident($ty:ty)),* $(,)?
        }
    ) => {
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $union {
            $(pub $field: Option<$ty>,)*
        }

        impl $union {
            /// Number of populated slots.
            pub fn populated(&self) -> usize {
                0 $(+ usize::from(self.$field.is_some()))*
            }
        }

        impl TryFrom<$union> for $enum {
            type Error = CairnError;

            fn try_from(u: $union) -> Result<Self, Self::Error> {
                let n = u.populated();
                if n != 1 {
                    return Err(CairnError::InvalidArgument(format!(
                        "{} must hold exactly one operation, found {}",
                        stringify!($union),
                        n
                    )));
                }
                $(
                    if let Some(v) = u.$field {
                        return Ok($enum::$variant(v));
                    }
                )*
                Err(CairnError::InvalidArgument(format!("empty {}", stringify!($union))))
            }
        }

        impl TryFrom<$enum> for $union {
            type Error = CairnError;

            fn try_from(v: $enum) -> Result<Self, Self::Error> {
                match v {
                    $(
                        $enum::$variant(inner) => Ok($union { $field: Some(inner), ..Default::default() }),
                    )*
                    other => Err(CairnError::InvalidArgument(format!(
                        "{} cannot be part of a batch",
                        other.method()
                    ))),
                }
            }
        }
    };
}

define_union!(RequestUnion, Request {
    contains: Contains(ContainsRequest),
    get: Get(GetRequest),
    put: Put(PutRequest),
    conditional_put: ConditionalPut(ConditionalPutRequest),
    increment: Increment(IncrementRequest),
    delete: Delete(DeleteRequest),
    delete_range: DeleteRange(DeleteRangeRequest),
    scan: Scan(ScanRequest),
    end_transaction: EndTransaction(EndTransactionRequest),
});

define_union!(ResponseUnion, Response {
    contains: Contains(ContainsResponse),
    get: Get(GetResponse),
    put: Put(PutResponse),
    conditional_put: ConditionalPut(ConditionalPutResponse),
    increment: Increment(IncrementResponse),
    delete: Delete(DeleteResponse),
    delete_range: DeleteRange(DeleteRangeResponse),
    scan: Scan(ScanResponse),
    end_transaction: EndTransaction(EndTransactionResponse),
});

#[cfg(test)]
mod tests {
    use cairn_types::Value;

    use super::*;
    use crate::header::RequestHeader;
    use crate::request::AdminMergeRequest;

    fn put() -> PutRequest {
        PutRequest { header: RequestHeader::new("k"), value: Value::bytes("v") }
    }

    #[test]
    fn exactly_one_slot() {
        let empty = RequestUnion::default();
        assert!(Request::try_from(empty).is_err());

        let two = RequestUnion {
            put: Some(put()),
            get: Some(GetRequest { header: RequestHeader::new("k") }),
            ..Default::default()
        };
        assert_eq!(two.populated(), 2);
        assert!(Request::try_from(two).is_err());

        let one = RequestUnion { put: Some(put()), ..Default::default() };
        assert!(matches!(Request::try_from(one), Ok(Request::Put(_))));
    }

    #[test]
    fn admin_requests_are_not_batchable() {
        let req = Request::AdminMerge(AdminMergeRequest { header: RequestHeader::new("a") });
        assert!(RequestUnion::try_from(req).is_err());
        assert!(RequestUnion::try_from(Request::Put(put())).is_ok());
    }
}
