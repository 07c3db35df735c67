//! TCP line transport to the signal head controller.
//!
//! Each frame is written as `"{channel}:{ON|OFF}\n"`.

use async_trait::async_trait;
use lanegate_env::{ActuatorFrame, ActuatorTransport, EnvError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub struct TcpTransport {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }
}

#[async_trait]
impl ActuatorTransport for TcpTransport {
    async fn connect(&mut self) -> Result<(), EnvError> {
        self.stream = None;
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| EnvError::connect(format!("{} ({})", self.addr, e)))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write(&mut self, frame: &ActuatorFrame) -> Result<(), EnvError> {
        let stream = self.stream.as_mut().ok_or(EnvError::LinkDown)?;

        let mut line = frame.encode();
        line.push(b'\n');
        if let Err(e) = stream.write_all(&line).await {
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
