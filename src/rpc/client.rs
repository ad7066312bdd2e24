use std::{
    io::{self, BufRead, BufReader, Write},
    net::{TcpStream, ToSocketAddrs},
};

use super::{Call, ErrorBody, Reply, Request, Response};
use crate::address::Address;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("{}: {}", .0.kind, .0.message)]
    Remote(ErrorBody),
}

/// Blocking client holding one connection.
pub struct RpcClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl RpcClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let writer = TcpStream::connect(addr)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self { reader, writer })
    }

    pub fn send(&mut self, request: &Request) -> Result<Response, ClientError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;

        let mut buf = String::new();
        if self.reader.read_line(&mut buf)? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(&buf)?)
    }

    pub fn call(&mut self, caller: Option<Address>, call: Call) -> Result<Reply, ClientError> {
        match self.send(&Request { caller, call })? {
            Response::Ok(reply) => Ok(reply),
            Response::Error(body) => Err(ClientError::Remote(body)),
        }
    }
}
