//! Modbus TCP transport
//!
//! Both the wallbox bus (Modbus RTU behind a TCP gateway) and the SolarLog
//! meter are reached through a [`ModbusConnectionManager`], which owns one
//! TCP connection, selects the slave per request and reconnects after
//! link failures. Requests are bounded by a connect and an operation timeout.

use crate::config::TimingConfig;
use crate::error::{PvWallboxError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::port::RegisterBus;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

/// A single register request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRequest {
    ReadInput { address: u16, count: u16 },
    ReadHolding { address: u16, count: u16 },
    WriteSingle { address: u16, value: u16 },
}

impl std::fmt::Display for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadInput { address, count } => {
                write!(f, "read {count} input register(s) at {address}")
            }
            Self::ReadHolding { address, count } => {
                write!(f, "read {count} holding register(s) at {address}")
            }
            Self::WriteSingle { address, value } => {
                write!(f, "write {value} to register {address}")
            }
        }
    }
}

/// Modbus TCP client for a single endpoint
pub struct ModbusClient {
    /// Modbus TCP client connection
    client: Option<tokio_modbus::client::Context>,

    /// `ip:port` of the endpoint
    address: String,

    /// Connection timeout
    connection_timeout: Duration,

    /// Operation timeout
    operation_timeout: Duration,

    /// Logger
    logger: StructuredLogger,
}

impl ModbusClient {
    /// Create a new Modbus client; no connection is made until [`connect`](Self::connect)
    pub fn new(ip: &str, port: u16, timing: &TimingConfig) -> Self {
        Self {
            client: None,
            address: format!("{ip}:{port}"),
            connection_timeout: Duration::from_millis(timing.connect_timeout_ms),
            operation_timeout: Duration::from_millis(timing.operation_timeout_ms),
            logger: get_logger("modbus"),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the Modbus server
    pub async fn connect(&mut self) -> Result<()> {
        self.logger
            .info(&format!("Connecting to Modbus server at {}", self.address));

        let socket_addr: std::net::SocketAddr = self
            .address
            .parse()
            .map_err(|e| PvWallboxError::modbus(format!("Invalid socket address: {e}")))?;

        match timeout(self.connection_timeout, tcp::connect(socket_addr)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Successfully connected to Modbus server");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to connect to {}: {e}", self.address);
                self.logger.error(&error_msg);
                Err(PvWallboxError::unreachable(error_msg))
            }
            Err(_) => {
                let error_msg = format!("Connection timeout for {}", self.address);
                self.logger.error(&error_msg);
                Err(PvWallboxError::timeout(error_msg))
            }
        }
    }

    /// Drop the connection; the next request needs a fresh [`connect`](Self::connect)
    pub fn disconnect(&mut self) {
        if self.client.take().is_some() {
            self.logger
                .info(&format!("Disconnected from {}", self.address));
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Execute one request against `slave_id`
    ///
    /// Returns the registers read, or an empty vector for writes. A Modbus
    /// exception response maps to `CommandRejected`; transport failures and
    /// timeouts drop the connection.
    pub async fn execute(&mut self, slave_id: u8, request: RegisterRequest) -> Result<Vec<u16>> {
        self.logger
            .trace(&format!("Slave {slave_id}: {request}"));

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PvWallboxError::unreachable("Not connected to Modbus server"))?;
        client.set_slave(Slave(slave_id));

        let outcome = match request {
            RegisterRequest::ReadInput { address, count } => {
                timeout(
                    self.operation_timeout,
                    client.read_input_registers(address, count),
                )
                .await
            }
            RegisterRequest::ReadHolding { address, count } => {
                timeout(
                    self.operation_timeout,
                    client.read_holding_registers(address, count),
                )
                .await
            }
            RegisterRequest::WriteSingle { address, value } => timeout(
                self.operation_timeout,
                client.write_single_register(address, value),
            )
            .await
            .map(|r| r.map(|inner| inner.map(|()| Vec::new()))),
        };

        match outcome {
            Ok(Ok(Ok(registers))) => Ok(registers),
            Ok(Ok(Err(exception))) => {
                let error_msg = format!("Slave {slave_id} refused to {request}: {exception:?}");
                self.logger.warn(&error_msg);
                Err(PvWallboxError::rejected(error_msg))
            }
            Ok(Err(e)) => {
                let error_msg = format!("Slave {slave_id} failed to {request}: {e}");
                self.logger.error(&error_msg);
                self.disconnect();
                Err(PvWallboxError::unreachable(error_msg))
            }
            Err(_) => {
                let error_msg = format!("Slave {slave_id} timed out to {request}");
                self.logger.error(&error_msg);
                self.disconnect();
                Err(PvWallboxError::timeout(error_msg))
            }
        }
    }
}

/// Decode a 32-bit unsigned value stored low word first
pub fn decode_u32_low_word_first(registers: &[u16]) -> Result<u32> {
    match registers {
        [low, high, ..] => Ok((u32::from(*high) << 16) | u32::from(*low)),
        _ => Err(PvWallboxError::modbus(
            "Insufficient registers for 32-bit value",
        )),
    }
}

/// First register of a response
pub fn decode_u16(registers: &[u16]) -> Result<u16> {
    registers
        .first()
        .copied()
        .ok_or_else(|| PvWallboxError::modbus("Empty register response"))
}

/// Connection manager with automatic reconnection
pub struct ModbusConnectionManager {
    client: ModbusClient,
    max_retry_attempts: u32,
    retry_delay: Duration,
    logger: StructuredLogger,
}

impl ModbusConnectionManager {
    /// Create a new connection manager
    pub fn new(client: ModbusClient, max_retry_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_retry_attempts: max_retry_attempts.max(1),
            retry_delay,
            logger: get_logger("modbus_manager"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Execute a request, reconnecting on link failures
    pub async fn execute_with_reconnect(
        &mut self,
        slave_id: u8,
        request: RegisterRequest,
    ) -> Result<Vec<u16>> {
        let mut attempts = 0;

        loop {
            if !self.client.is_connected() {
                if let Err(e) = self.client.connect().await {
                    attempts += 1;
                    if !e.is_connection_error() || attempts >= self.max_retry_attempts {
                        return Err(e);
                    }
                    self.logger
                        .warn(&format!("Connection attempt {attempts} failed: {e}"));
                    sleep(self.retry_delay).await;
                    continue;
                }
            }

            match self.client.execute(slave_id, request).await {
                Ok(registers) => return Ok(registers),
                Err(e) if e.is_connection_error() => {
                    attempts += 1;
                    if attempts >= self.max_retry_attempts {
                        return Err(e);
                    }
                    self.logger
                        .warn(&format!("Request failed due to connection error: {e}"));
                    sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait::async_trait]
impl RegisterBus for ModbusConnectionManager {
    async fn read_input_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.execute_with_reconnect(slave_id, RegisterRequest::ReadInput { address, count })
            .await
    }

    async fn read_holding_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.execute_with_reconnect(slave_id, RegisterRequest::ReadHolding { address, count })
            .await
    }

    async fn write_single_register(
        &mut self,
        slave_id: u8,
        address: u16,
        value: u16,
    ) -> Result<()> {
        self.execute_with_reconnect(slave_id, RegisterRequest::WriteSingle { address, value })
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_u32_low_word_first() {
        assert_eq!(decode_u32_low_word_first(&[0x1234, 0x0000]).unwrap(), 0x1234);
        assert_eq!(decode_u32_low_word_first(&[0x0000, 0x0001]).unwrap(), 65_536);
        assert_eq!(
            decode_u32_low_word_first(&[0xFFFF, 0xFFFF]).unwrap(),
            u32::MAX
        );
        assert!(decode_u32_low_word_first(&[0x0001]).is_err());
    }

    #[test]
    fn test_decode_u16() {
        assert_eq!(decode_u16(&[7, 1]).unwrap(), 7);
        assert!(decode_u16(&[]).is_err());
    }

    #[test]
    fn test_request_display() {
        let r = RegisterRequest::WriteSingle {
            address: 261,
            value: 60,
        };
        assert_eq!(r.to_string(), "write 60 to register 261");
    }

    #[test]
    fn test_modbus_client_creation() {
        let client = ModbusClient::new("192.168.1.110", 502, &TimingConfig::default());
        assert!(!client.is_connected());
        assert_eq!(client.address(), "192.168.1.110:502");
    }

    #[tokio::test]
    async fn test_invalid_address_is_not_a_connection_error() {
        let client = ModbusClient::new("not-an-ip", 502, &TimingConfig::default());
        let mut manager = ModbusConnectionManager::new(client, 3, Duration::from_millis(1));
        let err = manager.read_input_registers(1, 5, 1).await.unwrap_err();
        assert!(matches!(err, PvWallboxError::Modbus { .. }));
    }
}
