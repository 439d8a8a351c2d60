//! Request and response envelopes for the key-value protocol.

mod header;
mod request;
mod response;
mod union;

pub use header::{RequestHeader, ResponseHeader};
pub use request::{
    AdminMergeRequest, AdminSplitRequest, BatchRequest, ConditionalPutRequest, ContainsRequest,
    DeleteRangeRequest, DeleteRequest, EndTransactionRequest, GetRequest, IncrementRequest,
    InternalCommitTrigger, MergeTrigger, Method, PutRequest, Request, ScanRequest, SplitTrigger,
};
pub use response::{
    AdminMergeResponse, AdminSplitResponse, BatchResponse, ConditionalPutResponse,
    ContainsResponse, DeleteRangeResponse, DeleteResponse, EndTransactionResponse, GetResponse,
    IncrementResponse, PutResponse, Response, ScanResponse,
};
pub use union::{RequestUnion, ResponseUnion};
