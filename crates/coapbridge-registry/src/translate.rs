//! Translation between bus messages and outbound proxy exchanges

use coapbridge_core::{
    OptionSet, Options, ProxyRequest, ProxyResponse, RequestCode, RequestMessage, ResponseMessage,
};
use std::collections::BTreeMap;

/// Build the outbound request for a method call on the object at `path`
pub fn to_proxy_request(
    path: &str,
    code: RequestCode,
    message: &RequestMessage,
    confirmable: bool,
) -> ProxyRequest {
    let mut request = ProxyRequest::new(code, path);
    request.confirmable = confirmable;
    request.payload = message.payload.clone();
    request.options = copy_options(&message.options);
    request.options.uri_query = build_query(&message.attributes);
    request
}

/// Copy option fields onto an outbound option set
///
/// Optional scalars are copied only when set; tag lists entry by entry;
/// if-none-match always, since it is a plain flag.
fn copy_options(options: &Options) -> OptionSet {
    let mut set = OptionSet::default();
    if let Some(cf) = options.content_format {
        set.content_format = Some(cf);
    }
    for tag in &options.etag {
        set.etags.push(tag.clone());
    }
    if let Some(accept) = options.accept {
        set.accept = Some(accept);
    }
    for tag in &options.if_match {
        set.if_match.push(tag.clone());
    }
    set.if_none_match = options.if_none_match;
    if let Some(size1) = options.size1 {
        set.size1 = Some(size1);
    }
    set
}

/// Render attributes as `k1=v1&k2=v2`, in key order
pub fn build_query(attributes: &BTreeMap<String, String>) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Convert an upstream response into the reply for the bus caller
pub fn to_response_message(response: ProxyResponse) -> ResponseMessage {
    let set = response.options;
    let mut options = Options::default();
    if let Some(cf) = set.content_format {
        options.content_format = Some(cf);
    }
    options.etag.extend(set.etags);
    if let Some(accept) = set.accept {
        options.accept = Some(accept);
    }
    options.if_match.extend(set.if_match);
    options.if_none_match = set.if_none_match;
    if let Some(size1) = set.size1 {
        options.size1 = Some(size1);
    }

    ResponseMessage {
        code: response.code,
        options,
        payload: response.payload,
    }
}
