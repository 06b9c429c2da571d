#[cfg(test)] mod test_conn_options;
#[cfg(test)] mod test_proxy;
#[cfg(test)] mod test_logger;
