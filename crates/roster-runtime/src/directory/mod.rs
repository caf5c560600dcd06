mod consul;

pub use consul::ConsulDirectory;
