//! # transport
//!
//! why: the core never touches sockets; it hands payloads to a transmitter and hears back later
//! relations: implemented by the embedding runtime (see consensus-sim), driven by cluster.rs
//! what: Transmitter trait, Request/Response envelopes, completion callbacks

use std::fmt;

use crate::message::{AppendEntries, AppendEntriesResponse, RaftMessage, VoteRequest, VoteResponse};
use crate::NodeId;

/// The two rpc kinds a node sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    RequestVote,
    AppendEntries,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::RequestVote => write!(f, "request_vote"),
            MessageType::AppendEntries => write!(f, "append_entries"),
        }
    }
}

/// An outbound rpc payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RequestVote(VoteRequest),
    AppendEntries(AppendEntries),
}

impl Request {
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::RequestVote(_) => MessageType::RequestVote,
            Request::AppendEntries(_) => MessageType::AppendEntries,
        }
    }
}

/// The reply to a [`Request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Vote(VoteResponse),
    Append(AppendEntriesResponse),
}

/// Invoked at most once with the peer's reply; never invoked if the peer never answers
pub type ResponseCallback = Box<dyn FnOnce(Response) + Send>;

/// Fire-and-forget delivery of rpcs to peers.
///
/// `send` must not block and must not call back into the sender
/// synchronously; replies arrive later through `on_response`.
pub trait Transmitter {
    fn send(&mut self, peer: NodeId, request: Request, on_response: Option<ResponseCallback>);
}

impl From<Request> for RaftMessage {
    fn from(request: Request) -> Self {
        match request {
            Request::RequestVote(m) => RaftMessage::RequestVote(m),
            Request::AppendEntries(m) => RaftMessage::AppendEntries(m),
        }
    }
}

impl From<Response> for RaftMessage {
    fn from(response: Response) -> Self {
        match response {
            Response::Vote(m) => RaftMessage::VoteResponse(m),
            Response::Append(m) => RaftMessage::AppendEntriesResponse(m),
        }
    }
}

impl TryFrom<RaftMessage> for Request {
    type Error = RaftMessage;

    fn try_from(msg: RaftMessage) -> Result<Self, Self::Error> {
        match msg {
            RaftMessage::RequestVote(m) => Ok(Request::RequestVote(m)),
            RaftMessage::AppendEntries(m) => Ok(Request::AppendEntries(m)),
            other => Err(other),
        }
    }
}

impl TryFrom<RaftMessage> for Response {
    type Error = RaftMessage;

    fn try_from(msg: RaftMessage) -> Result<Self, Self::Error> {
        match msg {
            RaftMessage::VoteResponse(m) => Ok(Response::Vote(m)),
            RaftMessage::AppendEntriesResponse(m) => Ok(Response::Append(m)),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_names() {
        let req = Request::RequestVote(VoteRequest {
            term: 1,
            candidate_id: 0,
            last_log_index: None,
            last_log_term: None,
        });
        assert_eq!(req.message_type(), MessageType::RequestVote);
        assert_eq!(req.message_type().to_string(), "request_vote");
    }

    #[test]
    fn responses_do_not_convert_to_requests() {
        let msg = RaftMessage::from(Response::Append(AppendEntriesResponse { success: true }));
        assert!(Request::try_from(msg.clone()).is_err());
        assert_eq!(
            Response::try_from(msg).unwrap(),
            Response::Append(AppendEntriesResponse { success: true })
        );
    }
}
