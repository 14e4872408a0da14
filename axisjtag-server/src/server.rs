use std::{
    io,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use axisjtag_driver::JtagDriver;

use crate::{ConnectionHandler, ServeError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Serve exactly one connection, then return from the accept loop.
    pub run_once: bool,
    pub read_write_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_once: false,
            read_write_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use axisjtag_server::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .run_once(true)
///     .rw_timeout(Duration::from_secs(20))
///     .build(my_handler, my_driver);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Serve a single connection and return, instead of looping forever.
    pub fn run_once(mut self, run_once: bool) -> Self {
        self.config.run_once = run_once;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Build and return the server
    pub fn build<H: ConnectionHandler>(
        self,
        handler: H,
        driver: Box<dyn JtagDriver>,
    ) -> Server<H> {
        Server::new(handler, driver, self.config)
    }
}

/// TCP accept loop serving one client at a time through a
/// [`ConnectionHandler`].
pub struct Server<H: ConnectionHandler> {
    handler: H,
    driver: Box<dyn JtagDriver>,
    config: Config,
}

impl<H: ConnectionHandler> Server<H> {
    pub fn new(handler: H, driver: Box<dyn JtagDriver>, config: Config) -> Server<H> {
        Server {
            handler,
            driver,
            config,
        }
    }

    /// Binds `addr` and serves connections. Only binding and listening
    /// failures propagate; per-connection errors are logged and the loop
    /// accepts the next client.
    pub fn listen(&mut self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.run(listener)
    }

    /// Serves connections from an already-bound listener.
    pub fn run(&mut self, listener: TcpListener) -> io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("listening for connections on {}", addr);
        }
        loop {
            match listener.accept() {
                Ok((tcp, peer)) => {
                    log::info!("new client connection from {}", peer);
                    if let Err(e) = self.handle_client(tcp) {
                        log::error!("client error: {}", e);
                    }
                    log::info!("client connection closed");
                    if self.config.run_once {
                        log::info!("run-once mode: shutting down");
                        return Ok(());
                    }
                }
                Err(e) => log::error!("connection error: {}", e),
            }
        }
    }

    fn handle_client(&mut self, tcp: TcpStream) -> Result<(), ServeError> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))?;
        self.handler.serve(tcp, self.driver.as_mut())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use axisjtag_driver::DriverError;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    struct NullDriver;

    impl JtagDriver for NullDriver {
        fn query(&mut self) -> Result<usize, DriverError> {
            Ok(1024)
        }
        fn max_vector_size(&self) -> usize {
            1024
        }
        fn set_period_ns(&mut self, requested_ns: u32) -> u32 {
            requested_ns
        }
        fn send_vectors(
            &mut self,
            _num_bits: usize,
            _tms: &[u8],
            _tdi: &[u8],
            tdo: &mut [u8],
        ) -> Result<(), DriverError> {
            tdo.fill(0);
            Ok(())
        }
        fn dump_info(&self) {}
    }

    /// Handler that greets the client and hangs up.
    struct GreetingHandler;

    impl ConnectionHandler for GreetingHandler {
        fn serve(
            &mut self,
            mut stream: TcpStream,
            driver: &mut dyn JtagDriver,
        ) -> Result<(), ServeError> {
            let max = driver.max_vector_size();
            write!(stream, "max={}", max)?;
            Ok(())
        }
    }

    #[test]
    fn run_once_serves_a_single_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let worker = std::thread::spawn(move || {
            let mut server = Builder::new()
                .run_once(true)
                .build(GreetingHandler, Box::new(NullDriver));
            server.run(listener)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert_eq!(response, "max=1024");

        // run-once: the accept loop must have returned
        worker.join().unwrap().unwrap();
    }
}
