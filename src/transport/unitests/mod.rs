#[cfg(test)] mod test_frame;
#[cfg(test)] mod test_packet;
