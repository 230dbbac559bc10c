/// Status surfaced by [`CodecSession::process`][crate::CodecSession::process].
///
/// Informative events (`BasicInfo`, `ColorEncoding`, `Frame`, `Box`,
/// `JpegReconstruction`, `FullImage`) are only surfaced while subscribed;
/// flow-control events are surfaced unconditionally.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Event {
    /// The end of the codestream was reached.
    Success = 0,
    /// The input window is exhausted; hand over more bytes.
    NeedMoreInput = 1,
    /// A frame is ready to decode but no image sink was provided.
    NeedImageOutBuffer = 2,
    /// JPEG reconstruction data is ready but no JPEG sink was provided.
    NeedJpegOutBuffer = 3,
    /// The box sink filled up before the box payload was exhausted.
    BoxNeedMoreOutput = 4,
    /// The JPEG sink filled up before the JPEG bytes were exhausted.
    JpegNeedMoreOutput = 5,
    /// Basic image information is available through the getters.
    BasicInfo = 6,
    /// Colour profiles are available through the getters.
    ColorEncoding = 7,
    /// A frame header is available through the getters.
    Frame = 8,
    /// A container box header is available through the getters.
    Box = 9,
    /// JPEG reconstruction metadata was found.
    JpegReconstruction = 10,
    /// The current frame was fully decoded into the provided sinks.
    FullImage = 11,
}

impl Event {
    #[inline]
    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Set of [`Event`] kinds, used for subscriptions and stop conditions.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct EventSet(u16);

impl EventSet {
    pub const EMPTY: Self = Self(0);

    pub const fn of(events: &[Event]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < events.len() {
            bits |= events[i].bit();
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn with(self, event: Event) -> Self {
        Self(self.0 | event.bit())
    }

    #[inline]
    #[must_use]
    pub const fn without(self, event: Event) -> Self {
        Self(self.0 & !event.bit())
    }

    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, event: Event) -> bool {
        self.0 & event.bit() != 0
    }

    #[inline]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Event> for EventSet {
    fn from(event: Event) -> Self {
        Self(event.bit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let set = EventSet::of(&[Event::Frame, Event::Box]);
        assert!(set.contains(Event::Frame));
        assert!(set.contains(Event::Box));
        assert!(!set.contains(Event::FullImage));

        let set = set.with(Event::FullImage).without(Event::Box);
        assert!(set.contains(Event::FullImage));
        assert!(!set.contains(Event::Box));

        assert!(set.contains_all(EventSet::of(&[Event::Frame])));
        assert!(!set.contains_all(EventSet::of(&[Event::Frame, Event::Box])));
        assert!(EventSet::EMPTY.is_empty());
    }
}
