#[cfg(test)]
mod transport {
    mod udp_connection;
    mod tcp_connection;
}

fn main() {}
