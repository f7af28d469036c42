//! Hand-rolled rtnetlink client: just enough of the wire protocol to create
//! a veth pair and migrate one end into another network namespace, plus an
//! ioctl path to bring an interface up with an address.
//!
//! Requests are built over a fixed-size buffer shaped like the kernel's own
//! `struct { nlmsghdr; ifinfomsg; char buf[MAX_PAYLOAD]; }`: a primitive
//! attribute append, a nest open/close pair that retro-patches the
//! container's length once its contents are known, and one named escape
//! hatch (`append_sub_ifinfomsg`) for the one sub-message that embeds its
//! own interface-info header ahead of its attributes.

use std::ffi::CString;
use std::fmt;
use std::mem::size_of;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;

use crate::error::Error;

mod consts {
    //! Numeric values copied from the kernel uapi headers they are named
    //! after. Not all of these are exposed by every version of `libc`, so
    //! they are pinned here rather than imported, the same way a C program
    //! would pull them straight from the header.

    /// `linux/rtnetlink.h`
    pub const RTM_NEWLINK: u16 = 16;
    pub const NLM_F_REQUEST: u16 = 0x0001;
    pub const NLM_F_ACK: u16 = 0x0004;
    pub const NLM_F_CREATE: u16 = 0x0400;
    pub const NLM_F_EXCL: u16 = 0x0200;
    pub const NLMSG_ERROR: u16 = 0x0002;

    /// `linux/if_link.h`
    pub const IFLA_IFNAME: u16 = 3;
    pub const IFLA_LINKINFO: u16 = 18;
    pub const IFLA_NET_NS_FD: u16 = 28;
    pub const IFLA_INFO_KIND: u16 = 1;
    pub const IFLA_INFO_DATA: u16 = 2;

    /// `linux/veth.h`
    pub const VETH_INFO_PEER: u16 = 1;

    pub const NETLINK_ROUTE: i32 = 0;
}
use consts::*;

const NETLINK_ALIGN: usize = 4;
const MAX_PAYLOAD: usize = 1024;

fn align(len: usize) -> usize {
    (len + NETLINK_ALIGN - 1) & !(NETLINK_ALIGN - 1)
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct NlMsgHdr {
    nlmsg_len: u32,
    nlmsg_type: u16,
    nlmsg_flags: u16,
    nlmsg_seq: u32,
    nlmsg_pid: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct IfInfoMsg {
    ifi_family: u8,
    ifi_pad: u8,
    ifi_type: u16,
    ifi_index: i32,
    ifi_flags: u32,
    ifi_change: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct NlMsgErr {
    error: i32,
    msg: NlMsgHdr,
}

const HDR_LEN: usize = size_of::<NlMsgHdr>();
const IFI_LEN: usize = size_of::<IfInfoMsg>();
const MAX_LEN: usize = HDR_LEN + IFI_LEN + MAX_PAYLOAD;

/// A handle returned by [`NlRequest::open_nest`]; must be passed to
/// [`NlRequest::close_nest`] before the message is sent.
struct Nest(usize);

/// A single outgoing rtnetlink request, built over a fixed `MAX_LEN`
/// buffer. Every append keeps `len` aligned to [`NETLINK_ALIGN`], which is
/// what lets `close_nest` compute a nested attribute's length as a plain
/// subtraction.
struct NlRequest {
    buf: Vec<u8>,
    len: usize,
}

impl NlRequest {
    fn new(msg_type: u16, flags: u16) -> Self {
        let mut buf = vec![0u8; MAX_LEN];
        let len = HDR_LEN + IFI_LEN;
        let hdr = NlMsgHdr {
            nlmsg_len: 0, // patched in on finish()
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0, // patched in on finish()
            nlmsg_pid: 0,
        };
        buf[..HDR_LEN].copy_from_slice(as_bytes(&hdr));
        let ifi = IfInfoMsg {
            // Matches the original implementation's request shape: the
            // route-interface header's family is left as the netlink
            // family constant rather than AF_UNSPEC. The kernel does not
            // consult it for a veth RTM_NEWLINK, so the wire-compatible
            // choice is to leave it exactly as observed.
            ifi_family: nix::libc::AF_NETLINK as u8,
            ..Default::default()
        };
        buf[HDR_LEN..HDR_LEN + IFI_LEN].copy_from_slice(as_bytes(&ifi));
        Self { buf, len }
    }

    /// Appends a primitive TLV attribute. Fatal (returns `Err`) if the
    /// attribute would not fit in the fixed buffer.
    fn append_attr(&mut self, rta_type: u16, data: &[u8]) -> Result<(), Error> {
        let attr_len = 4 + data.len(); // RTA_LENGTH: aligned rtattr header + payload
        let tail = align(self.len);
        let new_len = tail + align(attr_len);
        if new_len > MAX_LEN {
            return Err(format!(
                "cannot add attribute: size ({new_len}) exceeds buffer bound ({MAX_LEN})"
            )
            .into());
        }
        let rta_len = attr_len as u16;
        self.buf[tail..tail + 2].copy_from_slice(&rta_len.to_ne_bytes());
        self.buf[tail + 2..tail + 4].copy_from_slice(&rta_type.to_ne_bytes());
        self.buf[tail + 4..tail + 4 + data.len()].copy_from_slice(data);
        self.len = new_len;
        Ok(())
    }

    /// Opens a nested attribute: reserves its header and returns a handle
    /// recording where it started, so its length can be patched once its
    /// contents (further attributes, possibly more nests) are appended.
    fn open_nest(&mut self, rta_type: u16) -> Result<Nest, Error> {
        let offset = align(self.len);
        self.append_attr(rta_type, &[])?;
        Ok(Nest(offset))
    }

    fn close_nest(&mut self, nest: Nest) {
        let rta_len = (self.len - nest.0) as u16;
        self.buf[nest.0..nest.0 + 2].copy_from_slice(&rta_len.to_ne_bytes());
    }

    /// The one place the generic attribute helpers cannot hide the
    /// protocol shape: a veth peer sub-message embeds a fresh, zeroed
    /// `ifinfomsg` ahead of its own attributes, and `nlmsg_len` must be
    /// advanced past it by hand before `IFLA_IFNAME` is appended for the
    /// peer.
    fn append_sub_ifinfomsg(&mut self) -> Result<(), Error> {
        let tail = align(self.len);
        if tail + IFI_LEN > MAX_LEN {
            return Err("cannot reserve peer ifinfomsg: buffer bound exceeded".into());
        }
        // The reserved bytes are already zero from the buffer's initial
        // allocation -- a zeroed ifinfomsg is exactly what the kernel
        // expects here.
        self.len = tail + IFI_LEN;
        Ok(())
    }

    /// Finalizes the message: stamps the sequence number and the final
    /// aligned length, then returns the bytes actually sent.
    fn finish(mut self, seq: u32) -> Vec<u8> {
        let hdr = NlMsgHdr {
            nlmsg_len: self.len as u32,
            nlmsg_seq: seq,
            ..header(&self.buf)
        };
        self.buf[..HDR_LEN].copy_from_slice(as_bytes(&hdr));
        self.buf.truncate(self.len);
        self.buf
    }
}

fn header(buf: &[u8]) -> NlMsgHdr {
    let mut hdr = NlMsgHdr::default();
    as_bytes_mut(&mut hdr).copy_from_slice(&buf[..HDR_LEN]);
    hdr
}

fn as_bytes<T>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

fn as_bytes_mut<T>(value: &mut T) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(value as *mut T as *mut u8, size_of::<T>()) }
}

fn cstring_bytes(name: &str) -> Result<Vec<u8>, Error> {
    Ok(CString::new(name)?.into_bytes_with_nul())
}

/// An open `AF_NETLINK`/`NETLINK_ROUTE` socket. Requests on one socket are
/// strictly FIFO: the sequence counter is incremented on every send, and
/// each send blocks on its acknowledgment before the next request is built.
pub struct RtnlSocket {
    fd: OwnedFd,
    seq: u32,
}

impl fmt::Debug for RtnlSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtnlSocket").field("fd", &self.fd.as_raw_fd()).finish()
    }
}

impl RtnlSocket {
    pub fn open() -> Result<Self, Error> {
        let raw = unsafe {
            nix::libc::socket(
                nix::libc::AF_NETLINK,
                nix::libc::SOCK_RAW | nix::libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(format!("cannot open rtnetlink socket: {}", Errno::last()).into());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        log::debug!("opened rtnetlink socket fd={}", fd.as_raw_fd());
        Ok(Self { fd, seq: 0 })
    }

    fn send(&mut self, req: NlRequest) -> Result<(), Error> {
        self.seq += 1;
        let buf = req.finish(self.seq);
        log::debug!(
            "rtnetlink: sending seq={} len={} type={}",
            self.seq,
            buf.len(),
            header(&buf).nlmsg_type
        );
        let iov = nix::libc::iovec {
            iov_base: buf.as_ptr() as *mut _,
            iov_len: buf.len(),
        };
        let msg = nix::libc::msghdr {
            msg_name: std::ptr::null_mut(),
            msg_namelen: 0,
            msg_iov: &iov as *const _ as *mut _,
            msg_iovlen: 1,
            msg_control: std::ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };
        let sent = unsafe { nix::libc::sendmsg(self.fd.as_raw_fd(), &msg, 0) };
        if sent < 0 {
            return Err(format!("cannot talk to rtnetlink: {}", Errno::last()).into());
        }
        self.recv_ack()
    }

    fn recv_ack(&mut self) -> Result<(), Error> {
        let mut resp = vec![0u8; MAX_PAYLOAD];
        let mut iov = nix::libc::iovec {
            iov_base: resp.as_mut_ptr() as *mut _,
            iov_len: resp.len(),
        };
        let mut msg = nix::libc::msghdr {
            msg_name: std::ptr::null_mut(),
            msg_namelen: 0,
            msg_iov: &mut iov,
            msg_iovlen: 1,
            msg_control: std::ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };
        let received = unsafe { nix::libc::recvmsg(self.fd.as_raw_fd(), &mut msg, 0) };
        if received < 0 {
            return Err(format!("netlink receive error: {}", Errno::last()).into());
        }
        if received == 0 {
            return Err("EOF on netlink socket".into());
        }
        let received = received as usize;
        if msg.msg_flags & nix::libc::MSG_TRUNC != 0 {
            return Err("truncated message".into());
        }
        if received < HDR_LEN {
            return Err(format!("malformed message: only {received} bytes received").into());
        }
        let hdr = header(&resp);
        let nlmsg_len = hdr.nlmsg_len as usize;
        if nlmsg_len < HDR_LEN || nlmsg_len > received {
            return Err(format!("malformed message: nlmsg_len={nlmsg_len}").into());
        }
        if hdr.nlmsg_type == NLMSG_ERROR {
            if nlmsg_len < HDR_LEN + size_of::<NlMsgErr>() {
                return Err("truncated error message".into());
            }
            let mut err = NlMsgErr::default();
            as_bytes_mut(&mut err).copy_from_slice(&resp[HDR_LEN..HDR_LEN + size_of::<NlMsgErr>()]);
            if err.error != 0 {
                let errno = Errno::from_raw(-err.error);
                return Err(format!("RTNETLINK: {errno}").into());
            }
        }
        log::debug!("rtnetlink: ack received");
        Ok(())
    }
}

/// Builds the veth pair (`name`/`peer`) in the caller's current network
/// namespace. Both ends exist there immediately after this call returns.
pub fn create_veth(sock: &mut RtnlSocket, name: &str, peer: &str) -> Result<(), Error> {
    let flags = NLM_F_REQUEST | NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK;
    let mut req = NlRequest::new(RTM_NEWLINK, flags);
    req.append_attr(IFLA_IFNAME, &cstring_bytes(name)?)?;
    let linkinfo = req.open_nest(IFLA_LINKINFO)?;
    req.append_attr(IFLA_INFO_KIND, b"veth\0")?;
    let infodata = req.open_nest(IFLA_INFO_DATA)?;
    let peerinfo = req.open_nest(VETH_INFO_PEER)?;
    req.append_sub_ifinfomsg()?;
    req.append_attr(IFLA_IFNAME, &cstring_bytes(peer)?)?;
    req.close_nest(peerinfo);
    req.close_nest(infodata);
    req.close_nest(linkinfo);
    sock.send(req)
}

/// Moves interface `name` into the network namespace identified by
/// `netns_fd`.
pub fn move_if_to_netns(sock: &mut RtnlSocket, name: &str, netns_fd: RawFd) -> Result<(), Error> {
    let mut req = NlRequest::new(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK);
    req.append_attr(IFLA_NET_NS_FD, &netns_fd.to_ne_bytes())?;
    req.append_attr(IFLA_IFNAME, &cstring_bytes(name)?)?;
    sock.send(req)
}

/// Opens `/proc/<pid>/ns/net`, a file descriptor usable with `setns` and as
/// the `IFLA_NET_NS_FD` payload above.
pub fn get_netns_fd(pid: nix::unistd::Pid) -> Result<OwnedFd, Error> {
    let path = format!("/proc/{}/ns/net", pid.as_raw());
    let file = std::fs::File::open(&path).map_err(|err| format!("cannot open {path}: {err}"))?;
    Ok(file.into())
}

/// Matches the kernel's `struct ifreq`: a 16-byte interface name followed
/// by a union large enough for its largest member (`struct ifmap`).
#[repr(C)]
struct IfReq {
    name: [u8; 16],
    data: [u8; 24],
}

impl IfReq {
    fn named(name: &str) -> Result<Self, Error> {
        if name.len() >= 16 {
            return Err(format!("interface name too long: {name}").into());
        }
        let mut req = IfReq {
            name: [0; 16],
            data: [0; 24],
        };
        req.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(req)
    }

    fn set_sockaddr_in(&mut self, addr: Ipv4Addr) {
        self.data[0..2].copy_from_slice(&(nix::libc::AF_INET as u16).to_ne_bytes());
        self.data[4..8].copy_from_slice(&u32::from(addr).to_be_bytes());
    }

    fn set_flags(&mut self, flags: i16) {
        self.data[0..2].copy_from_slice(&flags.to_ne_bytes());
    }
}

fn ioctl_ifreq(fd: RawFd, request: nix::libc::c_ulong, req: &IfReq) -> Result<(), Error> {
    let res = unsafe { nix::libc::ioctl(fd, request, req as *const IfReq) };
    if res < 0 {
        return Err(Errno::last().into());
    }
    Ok(())
}

/// Brings `name` up with the given address/netmask, via three `ioctl`
/// calls on an `AF_INET` datagram socket rather than a netlink round trip
/// -- shorter, and sufficient for single-address configuration.
pub fn if_up(name: &str, address: Ipv4Addr, netmask: Ipv4Addr) -> Result<(), Error> {
    let raw = unsafe { nix::libc::socket(nix::libc::AF_INET, nix::libc::SOCK_DGRAM, 0) };
    if raw < 0 {
        return Err(format!("cannot open ioctl socket: {}", Errno::last()).into());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut addr_req = IfReq::named(name)?;
    addr_req.set_sockaddr_in(address);
    ioctl_ifreq(fd.as_raw_fd(), nix::libc::SIOCSIFADDR, &addr_req)
        .map_err(|err| format!("cannot set address for {name}: {err}"))?;

    let mut mask_req = IfReq::named(name)?;
    mask_req.set_sockaddr_in(netmask);
    ioctl_ifreq(fd.as_raw_fd(), nix::libc::SIOCSIFNETMASK, &mask_req)
        .map_err(|err| format!("cannot set netmask for {name}: {err}"))?;

    let up_flags = (nix::libc::IFF_UP
        | nix::libc::IFF_BROADCAST
        | nix::libc::IFF_RUNNING
        | nix::libc::IFF_MULTICAST) as i16;
    let mut flags_req = IfReq::named(name)?;
    flags_req.set_flags(up_flags);
    ioctl_ifreq(fd.as_raw_fd(), nix::libc::SIOCSIFFLAGS, &flags_req)
        .map_err(|err| format!("cannot set flags for {name}: {err}"))?;

    Ok(())
}
