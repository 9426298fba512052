use std::{io, net::SocketAddr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator output failed: {0}")]
    Output(String),
}

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("failed to bind responder at {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("responder socket error")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    #[error("per-tick hook failed: {0}")]
    Hook(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request is empty")]
    Empty,
    #[error("request is not valid utf-8")]
    NotUtf8,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("malformed request head: {0}")]
    Head(httparse::Error),
    #[error("request head incomplete")]
    Incomplete,
}
