//! Minimal XML-RPC codec for the supervisor control interface.
//!
//! Encodes `methodCall` documents and decodes `methodResponse` documents
//! (success or fault). Only the value types the supervisor API produces are
//! supported: int/i4, boolean, string, double, nil, array and struct;
//! dateTime and base64 payloads are surfaced as strings.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::SupervisorError;

/// An XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            // supervisor sometimes answers with 1/0 integers
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a struct member.
    pub fn get(&self, member: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(member),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

/// Decoded `methodResponse`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Value),
    Fault { code: i32, message: String },
}

/// Encodes a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodCall><methodName>");
    out.push_str(&quick_xml::escape::escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(v) => {
            out.push_str("<int>");
            out.push_str(&v.to_string());
            out.push_str("</int>");
        }
        Value::Bool(v) => {
            out.push_str(if *v {
                "<boolean>1</boolean>"
            } else {
                "<boolean>0</boolean>"
            });
        }
        Value::String(v) => {
            out.push_str("<string>");
            out.push_str(&quick_xml::escape::escape(v.as_str()));
            out.push_str("</string>");
        }
        Value::Double(v) => {
            out.push_str("<double>");
            out.push_str(&v.to_string());
            out.push_str("</double>");
        }
        Value::Array(values) => {
            out.push_str("<array><data>");
            for v in values {
                write_value(out, v);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, v) in members {
                out.push_str("<member><name>");
                out.push_str(&quick_xml::escape::escape(name.as_str()));
                out.push_str("</name>");
                write_value(out, v);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

/// Decodes a `methodResponse` document.
pub fn parse_response(body: &str) -> Result<Response, SupervisorError> {
    let root = parse_tree(body)?;
    if root.name != "methodResponse" {
        return Err(malformed(format!(
            "expected <methodResponse>, found <{}>",
            root.name
        )));
    }

    if let Some(fault) = root.child("fault") {
        let value = decode_value(require(fault.child("value"), "fault/value")?)?;
        let code = value
            .get("faultCode")
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed("fault without faultCode"))?;
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(Response::Fault {
            code: code as i32,
            message,
        });
    }

    let value = root
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"));
    let value = decode_value(require(value, "params/param/value")?)?;
    Ok(Response::Success(value))
}

/// Element tree built from the event stream; enough structure for XML-RPC.
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn malformed(message: impl Into<String>) -> SupervisorError {
    SupervisorError::MalformedResponse(message.into())
}

fn require<'a>(element: Option<&'a Element>, path: &str) -> Result<&'a Element, SupervisorError> {
    element.ok_or_else(|| malformed(format!("missing <{}>", path)))
}

fn parse_tree(xml: &str) -> Result<Element, SupervisorError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    // Synthetic document node; the real root ends up as its only child.
    let mut stack = vec![Element::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::named(e.name().as_ref())),
            Ok(Event::Empty(e)) => {
                let element = Element::named(e.name().as_ref());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| malformed(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                let raw = c.into_inner();
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&raw));
                }
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Err(malformed("unbalanced end tag")),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(e.to_string())),
        }
    }

    if stack.len() != 1 {
        return Err(malformed("unexpected end of document"));
    }

    stack
        .pop()
        .and_then(|doc| doc.children.into_iter().next())
        .ok_or_else(|| malformed("empty document"))
}

fn decode_value(element: &Element) -> Result<Value, SupervisorError> {
    let Some(inner) = element.children.first() else {
        // untyped values are strings
        return Ok(Value::String(element.text.clone()));
    };

    match inner.name.as_str() {
        "int" | "i4" | "i8" => inner
            .text
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| malformed(format!("invalid int '{}'", inner.text))),
        "boolean" => match inner.text.trim() {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            other => Err(malformed(format!("invalid boolean '{}'", other))),
        },
        "double" => inner
            .text
            .trim()
            .parse()
            .map(Value::Double)
            .map_err(|_| malformed(format!("invalid double '{}'", inner.text))),
        "string" | "dateTime.iso8601" | "base64" => Ok(Value::String(inner.text.clone())),
        "nil" => Ok(Value::Nil),
        "array" => {
            let values = match inner.child("data") {
                Some(data) => data
                    .children
                    .iter()
                    .filter(|c| c.name == "value")
                    .map(decode_value)
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            Ok(Value::Array(values))
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in inner.children.iter().filter(|c| c.name == "member") {
                let name = require(member.child("name"), "member/name")?.text.clone();
                let value = decode_value(require(member.child("value"), "member/value")?)?;
                members.insert(name, value);
            }
            Ok(Value::Struct(members))
        }
        other => Err(malformed(format!("unsupported value type <{}>", other))),
    }
}
