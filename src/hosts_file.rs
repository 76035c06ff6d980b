//! Shared hosts-file fragment for peer discovery.
//!
//! Generated only after every host in a batch is ready; partial address
//! knowledge must never be written.

use std::net::IpAddr;

/// Fixed first line of every generated fragment.
pub const LOCALHOST_LINE: &str = "127.0.0.1\tlocalhost\tlocalhost.localdomain";

/// One provisioned host's entry in the fragment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostsEntry {
    /// Address assigned by the backend.
    pub address: IpAddr,
    /// Fully qualified name.
    pub fqdn: String,
    /// Name up to the first dot.
    pub short_name: String,
}

/// Renders the fragment: the fixed localhost line followed by one
/// `<address>\t<fqdn>\t<shortname>` line per host, in batch order.
#[must_use]
pub fn fragment(entries: &[HostsEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(LOCALHOST_LINE.to_owned());
    for entry in entries {
        lines.push(format!(
            "{}\t{}\t{}",
            entry.address, entry.fqdn, entry.short_name
        ));
    }
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_lists_localhost_then_hosts_in_order() {
        let entries = [
            HostsEntry {
                address: "10.0.0.2".parse().expect("valid address"),
                fqdn: String::from("alpha.example.net"),
                short_name: String::from("alpha"),
            },
            HostsEntry {
                address: "10.0.0.3".parse().expect("valid address"),
                fqdn: String::from("beta.example.net"),
                short_name: String::from("beta"),
            },
        ];
        let rendered = fragment(&entries);
        assert_eq!(
            rendered,
            "127.0.0.1\tlocalhost\tlocalhost.localdomain\n\
             10.0.0.2\talpha.example.net\talpha\n\
             10.0.0.3\tbeta.example.net\tbeta\n"
        );
    }

    #[test]
    fn empty_batch_still_carries_localhost() {
        assert_eq!(
            fragment(&[]),
            "127.0.0.1\tlocalhost\tlocalhost.localdomain\n"
        );
    }
}
