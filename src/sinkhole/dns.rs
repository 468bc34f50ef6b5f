use super::packet::PacketError;
use crate::classifier::normalize_domain;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use std::net::Ipv4Addr;

/// A decoded DNS query and its first question.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub message: Message,
    /// Normalised name of the first question.
    pub domain: String,
    pub query_type: RecordType,
}

pub fn parse_query(payload: &[u8]) -> Result<DnsQuery, PacketError> {
    let message = Message::from_vec(payload).map_err(|e| PacketError::Dns(e.to_string()))?;
    if message.message_type() != MessageType::Query {
        return Err(PacketError::NotQuery);
    }

    let question = message.queries().first().ok_or(PacketError::NoQuestion)?;
    let domain = normalize_domain(&question.name().to_ascii());
    let query_type = question.query_type();

    Ok(DnsQuery {
        message,
        domain,
        query_type,
    })
}

/// Answer for a blocked name: the query's header echoed back as a successful
/// response, its first question, and for A/ANY a single `0.0.0.0` record.
pub fn sinkhole_response(query: &DnsQuery, ttl: u32) -> Result<Vec<u8>, PacketError> {
    let request = &query.message;
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_authoritative(request.authoritative())
        .set_truncated(false)
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(request.recursion_available())
        .set_authentic_data(request.authentic_data())
        .set_checking_disabled(request.checking_disabled())
        .set_response_code(ResponseCode::NoError);

    let question = request.queries().first().ok_or(PacketError::NoQuestion)?;
    response.add_query(question.clone());

    if matches!(query.query_type, RecordType::A | RecordType::ANY) {
        response.add_answer(Record::from_rdata(
            question.name().clone(),
            ttl,
            RData::A(A(Ipv4Addr::UNSPECIFIED)),
        ));
    }

    response
        .to_vec()
        .map_err(|e| PacketError::Dns(e.to_string()))
}
