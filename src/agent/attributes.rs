//! ICE-specific STUN attributes used by connectivity checks.

use shared::error::{Error, Result};
use stun::attributes::*;
use stun::message::*;

const PRIORITY_SIZE: usize = 4;
const TIE_BREAKER_SIZE: usize = 8;

/// PRIORITY attribute (RFC 8445 section 7.1.1).
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct PriorityAttr(pub u32);

impl Setter for PriorityAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = vec![0u8; PRIORITY_SIZE];
        v.copy_from_slice(&self.0.to_be_bytes());
        m.add(ATTR_PRIORITY, &v);
        Ok(())
    }
}

impl PriorityAttr {
    pub fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_PRIORITY)?;
        if v.len() != PRIORITY_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.0 = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        Ok(())
    }
}

/// USE-CANDIDATE attribute (RFC 8445 section 7.1.2).
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct UseCandidateAttr;

impl Setter for UseCandidateAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}

impl UseCandidateAttr {
    #[must_use]
    pub fn is_set(m: &Message) -> bool {
        m.get(ATTR_USE_CANDIDATE).is_ok()
    }
}

fn add_tie_breaker(value: u64, m: &mut Message, t: AttrType) -> Result<()> {
    let mut v = vec![0u8; TIE_BREAKER_SIZE];
    v.copy_from_slice(&value.to_be_bytes());
    m.add(t, &v);
    Ok(())
}

/// ICE-CONTROLLING attribute carrying the tie-breaker number.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct AttrControlling(pub u64);

impl Setter for AttrControlling {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        add_tie_breaker(self.0, m, ATTR_ICE_CONTROLLING)
    }
}

/// ICE-CONTROLLED attribute carrying the tie-breaker number.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct AttrControlled(pub u64);

impl Setter for AttrControlled {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        add_tie_breaker(self.0, m, ATTR_ICE_CONTROLLED)
    }
}
