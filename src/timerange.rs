//! Clock and calendar range predicates.
//!
//! Scheduling features ("enable this output 9 to 5 on weekdays") are
//! configured as human-readable range strings. Supported forms:
//!
//! ```text
//! 9:00 - 17:30                  daily time-of-day range
//! 11 pm - 1 am                  daily range spanning midnight
//! Fri 17:00 - Mon 8:00          weekday span (may cross the weekend)
//! Mon/Wed/Fri 9:00 - 17:00      weekday mask with a daily time range
//! Tue - Thu                     weekday span, all day
//! Dec 23 - Jan 2                calendar date range (may cross New Year)
//! Mar 20 6:00 - Jun 21 18:00    date range with endpoint times
//! ```
//!
//! Times are `hh[:mm[:ss]]` with an optional am/pm marker (a bare `a`
//! or `p` also works); without a marker the clock is 24-hour, and the
//! special value `24:00:00` names the instant just past the end of a
//! day (ranges exclude their end time). Weekday and month names are
//! case-insensitive three-letter prefixes.
//!
//! Dates normalize to a *year-day number*, `(month << 8) | day`: a
//! deliberately non-contiguous encoding that still sorts in calendar
//! order, so range membership is plain integer comparison. Ranges
//! whose end precedes their start wrap (around midnight, the week, or
//! the year) and are evaluated as two sub-ranges joined at the seam.

/// Seconds in a day; also the normalized form of 24:00:00.
const DAY_SECONDS: u32 = 24 * 60 * 60;

/// A calendar instant, as delivered by the wall-clock collaborator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DateTime {
    /// Month 1..=12.
    pub month: u8,
    /// Day of month 1..=31.
    pub day: u8,
    /// Day of week, 0 = Monday .. 6 = Sunday.
    pub weekday: u8,
    /// Seconds since local midnight.
    pub seconds: u32,
}

/// Non-contiguous sortable day-of-year code.
#[inline]
pub fn year_day(month: u8, day: u8) -> u16 {
    ((month as u16) << 8) | day as u16
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Expected `hh[:mm[:ss]] [am|pm]`.
    ExpectedTime,
    /// Hour/minute/second out of range.
    TimeOutOfRange,
    /// Expected `-` between the endpoints.
    ExpectedDash,
    /// Expected another weekday name.
    ExpectedWeekday,
    /// Expected the ending date of a date range.
    ExpectedDate,
    /// Unconsumed text after the range.
    TrailingText,
}

/// A parsed range predicate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeRange {
    /// The same clock-time window every day.
    Daily { start: u32, end: u32 },
    /// From a time on one weekday through a time on another, spanning
    /// the days between.
    WeekdaySpan {
        day_start: u8,
        day_end: u8,
        start: u32,
        end: u32,
    },
    /// A daily time window active only on the masked weekdays
    /// (bit 0 = Monday). A window spanning midnight must *start* on a
    /// masked day.
    WeekdayMask { mask: u8, start: u32, end: u32 },
    /// From a time on one calendar date through a time on another.
    DateSpan {
        date_start: u16,
        date_end: u16,
        start: u32,
        end: u32,
    },
}

impl TimeRange {
    /// Parses a range specification string.
    pub fn parse(s: &str) -> Result<TimeRange, ParseError> {
        let mut p = Cursor::new(s);
        let range = parse_range(&mut p)?;
        p.skip_ws();
        if p.at_end() {
            Ok(range)
        } else {
            Err(ParseError::TrailingText)
        }
    }

    /// Does the instant fall inside this range? Start times are
    /// inclusive, end times exclusive.
    pub fn contains(&self, t: &DateTime) -> bool {
        match *self {
            TimeRange::Daily { start, end } => time_in_daily(t.seconds, start, end),

            TimeRange::WeekdaySpan {
                day_start,
                day_end,
                start,
                end,
            } => {
                let wd = t.weekday;
                let mut in_range = if day_start < day_end {
                    wd >= day_start && wd <= day_end
                } else {
                    // Spans the week boundary.
                    wd <= day_end || wd >= day_start
                };
                // On the endpoint days, the clock time also gates.
                if (wd == day_start && t.seconds < start)
                    || (wd == day_end && t.seconds >= end)
                {
                    in_range = false;
                }
                in_range
            }

            TimeRange::WeekdayMask { mask, start, end } => {
                let day_in_mask = mask & (1 << t.weekday) != 0;
                let prior = if t.weekday == 0 { 6 } else { t.weekday - 1 };
                let prior_in_mask = mask & (1 << prior) != 0;
                if start < end {
                    day_in_mask && t.seconds >= start && t.seconds < end
                } else {
                    // The window crosses midnight: the portion after
                    // the start belongs to a masked day, the portion
                    // before the end belongs to the *following*
                    // morning, so it matches when the prior day is
                    // masked.
                    (day_in_mask && t.seconds >= start)
                        || (prior_in_mask && t.seconds < end)
                }
            }

            TimeRange::DateSpan {
                date_start,
                date_end,
                start,
                end,
            } => {
                let day = year_day(t.month, t.day);
                let mut in_range = if date_start < date_end {
                    day >= date_start && day <= date_end
                } else {
                    // Spans the end of the year.
                    day >= date_start || day <= date_end
                };
                if (day == date_start && t.seconds < start)
                    || (day == date_end && t.seconds >= end)
                {
                    in_range = false;
                }
                in_range
            }
        }
    }
}

fn time_in_daily(seconds: u32, start: u32, end: u32) -> bool {
    if start < end {
        seconds >= start && seconds < end
    } else {
        // Spans midnight: start..midnight plus midnight..end.
        seconds >= start || seconds < end
    }
}

// --- parser -----------------------------------------------------------------

struct Cursor<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Cursor {
            s: s.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.s.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at_digit(&mut self) -> bool {
        self.skip_ws();
        matches!(self.peek(), Some(c) if c.is_ascii_digit())
    }

    /// Scans up to two digits; `None` if there is no digit here.
    fn scan_two_digits(&mut self) -> Option<u32> {
        let c = self.peek()?;
        if !c.is_ascii_digit() {
            return None;
        }
        self.bump();
        let mut v = (c - b'0') as u32;
        if let Some(c2) = self.peek() {
            if c2.is_ascii_digit() {
                self.bump();
                v = v * 10 + (c2 - b'0') as u32;
            }
        }
        Some(v)
    }

    /// Matches a case-insensitive three-letter name from `table`
    /// (concatenated three-letter entries), requiring the token to end
    /// after the match. Returns the entry index.
    fn scan_name3(&mut self, table: &[u8]) -> Option<usize> {
        self.skip_ws();
        if self.pos + 3 > self.s.len() {
            return None;
        }
        let tok = [
            self.s[self.pos].to_ascii_lowercase(),
            self.s[self.pos + 1].to_ascii_lowercase(),
            self.s[self.pos + 2].to_ascii_lowercase(),
        ];
        let ends_ok = match self.s.get(self.pos + 3) {
            Some(c) => !c.is_ascii_alphabetic(),
            None => true,
        };
        if !ends_ok {
            return None;
        }
        for (i, entry) in table.chunks(3).enumerate() {
            if entry == tok {
                self.pos += 3;
                return Some(i);
            }
        }
        None
    }

    fn scan_weekday(&mut self) -> Option<u8> {
        self.scan_name3(b"montuewedthufrisatsun").map(|i| i as u8)
    }

    /// Scans `Mon dd` into a year-day number.
    fn scan_date(&mut self) -> Option<u16> {
        let start = self.pos;
        let month = self.scan_name3(b"janfebmaraprmayjunjulaugsepoctnovdec");
        let month = match month {
            Some(m) => m as u8 + 1,
            None => return None,
        };
        self.skip_ws();
        match self.scan_two_digits() {
            Some(day) if day >= 1 && day <= 31 => Some(year_day(month, day as u8)),
            _ => {
                self.pos = start;
                None
            }
        }
    }

    /// Scans a time of day into seconds since midnight.
    fn scan_time(&mut self) -> Result<u32, ParseError> {
        self.skip_ws();
        let mut ele = [0u32; 3];
        let mut n = 0;
        while n < 3 {
            match self.scan_two_digits() {
                Some(v) => {
                    ele[n] = v;
                    n += 1;
                }
                None => break,
            }
            if self.peek() == Some(b':') {
                self.bump();
            } else {
                break;
            }
        }
        if n == 0 {
            return Err(ParseError::ExpectedTime);
        }

        // Optional am/pm marker ("a", "am", "p", "pm", any case).
        self.skip_ws();
        if let Some(c) = self.peek() {
            let marker = c.to_ascii_lowercase();
            if marker == b'a' || marker == b'p' {
                if ele[0] < 1 || ele[0] > 12 {
                    return Err(ParseError::TimeOutOfRange);
                }
                if ele[0] == 12 && marker == b'a' {
                    ele[0] = 0; // 12 AM is midnight
                } else if ele[0] != 12 && marker == b'p' {
                    ele[0] += 12;
                }
                self.bump();
                if matches!(self.peek(), Some(m) if m.to_ascii_lowercase() == b'm') {
                    self.bump();
                }
            }
        }

        // 24:00:00 is allowed as the exclusive end-of-day marker.
        let ok = (ele[0] <= 23 && ele[1] <= 59 && ele[2] <= 59)
            || (ele[0] == 24 && ele[1] == 0 && ele[2] == 0);
        if !ok {
            return Err(ParseError::TimeOutOfRange);
        }
        Ok(ele[0] * 3600 + ele[1] * 60 + ele[2])
    }
}

fn parse_range(p: &mut Cursor) -> Result<TimeRange, ParseError> {
    // Weekday-led forms.
    if let Some(day) = p.scan_weekday() {
        p.skip_ws();
        if p.eat(b'-') {
            // "Day - Day": full days from start to end.
            let end_day = p.scan_weekday().ok_or(ParseError::ExpectedWeekday)?;
            return Ok(TimeRange::WeekdaySpan {
                day_start: day,
                day_end: end_day,
                start: 0,
                end: DAY_SECONDS,
            });
        }
        if p.peek() == Some(b'/') {
            // "Day/Day/..." with an optional daily time range.
            let mut mask = 1u8 << day;
            while p.peek() == Some(b'/') {
                p.bump();
                let d = p.scan_weekday().ok_or(ParseError::ExpectedWeekday)?;
                mask |= 1 << d;
                p.skip_ws();
            }
            if p.at_end() {
                return Ok(TimeRange::WeekdayMask {
                    mask,
                    start: 0,
                    end: DAY_SECONDS,
                });
            }
            let start = p.scan_time()?;
            if !p.eat(b'-') {
                return Err(ParseError::ExpectedDash);
            }
            let end = p.scan_time()?;
            return Ok(TimeRange::WeekdayMask { mask, start, end });
        }
        if p.at_digit() {
            // "Day time - Day time" or "Day time - time".
            let start = p.scan_time()?;
            if !p.eat(b'-') {
                return Err(ParseError::ExpectedDash);
            }
            if let Some(end_day) = p.scan_weekday() {
                let end = p.scan_time()?;
                return Ok(TimeRange::WeekdaySpan {
                    day_start: day,
                    day_end: end_day,
                    start,
                    end,
                });
            }
            let end = p.scan_time()?;
            return Ok(TimeRange::WeekdayMask {
                mask: 1 << day,
                start,
                end,
            });
        }
        // A bare day name: that whole day, every week.
        return Ok(TimeRange::WeekdayMask {
            mask: 1 << day,
            start: 0,
            end: DAY_SECONDS,
        });
    }

    // Date-led forms.
    if let Some(date_start) = p.scan_date() {
        p.skip_ws();
        if p.eat(b'-') {
            let date_end = p.scan_date().ok_or(ParseError::ExpectedDate)?;
            return Ok(TimeRange::DateSpan {
                date_start,
                date_end,
                start: 0,
                end: DAY_SECONDS,
            });
        }
        if p.at_end() {
            // A single date, all day.
            return Ok(TimeRange::DateSpan {
                date_start,
                date_end: date_start,
                start: 0,
                end: DAY_SECONDS,
            });
        }
        let start = p.scan_time()?;
        if !p.eat(b'-') {
            return Err(ParseError::ExpectedDash);
        }
        let date_end = p.scan_date().ok_or(ParseError::ExpectedDate)?;
        let end = p.scan_time()?;
        return Ok(TimeRange::DateSpan {
            date_start,
            date_end,
            start,
            end,
        });
    }

    // Plain daily time range.
    let start = p.scan_time()?;
    if !p.eat(b'-') {
        return Err(ParseError::ExpectedDash);
    }
    let end = p.scan_time()?;
    Ok(TimeRange::Daily { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(weekday: u8, h: u32, m: u32) -> DateTime {
        DateTime {
            month: 6,
            day: 15,
            weekday,
            seconds: h * 3600 + m * 60,
        }
    }

    fn on(month: u8, day: u8, h: u32) -> DateTime {
        DateTime {
            month,
            day,
            weekday: 0,
            seconds: h * 3600,
        }
    }

    #[test]
    fn daily_range() {
        let r = TimeRange::parse("9:00 - 17:30").unwrap();
        assert_eq!(
            r,
            TimeRange::Daily {
                start: 9 * 3600,
                end: 17 * 3600 + 30 * 60
            }
        );
        assert!(r.contains(&at(2, 9, 0)));
        assert!(r.contains(&at(5, 17, 29)));
        assert!(!r.contains(&at(2, 17, 30)));
        assert!(!r.contains(&at(2, 8, 59)));
    }

    #[test]
    fn daily_range_spanning_midnight() {
        let r = TimeRange::parse("23:00 - 1:00").unwrap();
        assert!(r.contains(&at(0, 23, 30)));
        assert!(r.contains(&at(1, 0, 30)));
        assert!(!r.contains(&at(0, 12, 0)));
        assert!(!r.contains(&at(0, 1, 0)));
    }

    #[test]
    fn am_pm_markers() {
        assert_eq!(
            TimeRange::parse("2:00 pm - 4:00 pm").unwrap(),
            TimeRange::Daily {
                start: 14 * 3600,
                end: 16 * 3600
            }
        );
        // Midnight and noon edge cases, and the bare-letter form.
        assert_eq!(
            TimeRange::parse("12 am - 12 pm").unwrap(),
            TimeRange::Daily {
                start: 0,
                end: 12 * 3600
            }
        );
        assert_eq!(
            TimeRange::parse("9a - 5p").unwrap(),
            TimeRange::Daily {
                start: 9 * 3600,
                end: 17 * 3600
            }
        );
    }

    #[test]
    fn end_of_day_marker() {
        let r = TimeRange::parse("22:00 - 24:00").unwrap();
        assert!(r.contains(&at(0, 23, 59)));
        assert!(!r.contains(&at(0, 0, 0)));
    }

    #[test]
    fn weekday_mask_with_times() {
        // Mon/Wed/Fri working hours.
        let r = TimeRange::parse("Mon/Wed/Fri 9:00-17:00").unwrap();
        assert!(r.contains(&at(2, 12, 0))); // Wednesday noon
        assert!(!r.contains(&at(1, 12, 0))); // Tuesday noon
        assert!(!r.contains(&at(4, 18, 0))); // Friday evening
        assert!(!r.contains(&at(0, 8, 59))); // Monday, too early
        assert!(r.contains(&at(0, 9, 0)));
    }

    #[test]
    fn weekday_mask_spanning_midnight_matches_next_morning() {
        // Late window starting Mon/Wed/Fri: the after-midnight tail
        // lands on Tue/Thu/Sat.
        let r = TimeRange::parse("Mon/Wed/Fri 23:00 - 1:00").unwrap();
        assert!(r.contains(&at(0, 23, 30))); // Monday night
        assert!(r.contains(&at(1, 0, 30))); // Tuesday small hours
        assert!(!r.contains(&at(2, 0, 30))); // Wednesday small hours (Tue not masked)
        assert!(r.contains(&at(3, 0, 30))); // Thursday small hours
        assert!(!r.contains(&at(0, 12, 0)));
    }

    #[test]
    fn weekday_span_with_times() {
        let r = TimeRange::parse("Tue 9:00 - Fri 17:00").unwrap();
        assert!(!r.contains(&at(1, 8, 59)));
        assert!(r.contains(&at(1, 9, 0)));
        assert!(r.contains(&at(2, 3, 0))); // all day Wednesday
        assert!(r.contains(&at(4, 16, 59)));
        assert!(!r.contains(&at(4, 17, 0)));
        assert!(!r.contains(&at(6, 12, 0)));
    }

    #[test]
    fn weekday_span_across_weekend() {
        let r = TimeRange::parse("Fri 17:00 - Mon 8:00").unwrap();
        assert!(r.contains(&at(4, 18, 0)));
        assert!(r.contains(&at(5, 12, 0))); // Saturday
        assert!(r.contains(&at(6, 12, 0))); // Sunday
        assert!(r.contains(&at(0, 7, 59)));
        assert!(!r.contains(&at(0, 8, 0)));
        assert!(!r.contains(&at(2, 12, 0)));
    }

    #[test]
    fn full_day_weekday_span() {
        let r = TimeRange::parse("Tue - Thu").unwrap();
        assert!(r.contains(&at(2, 0, 0)));
        assert!(r.contains(&at(3, 23, 59)));
        assert!(!r.contains(&at(4, 0, 0)));
    }

    #[test]
    fn date_range() {
        let r = TimeRange::parse("Mar 20 - Jun 21").unwrap();
        assert!(r.contains(&on(3, 20, 0)));
        assert!(r.contains(&on(5, 1, 12)));
        assert!(r.contains(&on(6, 21, 23)));
        assert!(!r.contains(&on(6, 22, 0)));
        assert!(!r.contains(&on(3, 19, 12)));
    }

    #[test]
    fn date_range_across_new_year() {
        let r = TimeRange::parse("Dec 23 - Jan 2").unwrap();
        assert!(r.contains(&on(12, 25, 12)));
        assert!(r.contains(&on(1, 1, 0)));
        assert!(!r.contains(&on(1, 3, 0)));
        assert!(!r.contains(&on(7, 4, 12)));
    }

    #[test]
    fn date_range_with_endpoint_times() {
        let r = TimeRange::parse("Mar 20 6:00 - Jun 21 18:00").unwrap();
        assert!(!r.contains(&on(3, 20, 5)));
        assert!(r.contains(&on(3, 20, 6)));
        assert!(r.contains(&on(6, 21, 17)));
        assert!(!r.contains(&on(6, 21, 18)));
    }

    #[test]
    fn year_day_sorts_in_calendar_order() {
        assert!(year_day(1, 31) < year_day(2, 1));
        assert!(year_day(11, 30) < year_day(12, 1));
        assert!(year_day(6, 15) < year_day(6, 16));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(TimeRange::parse(""), Err(ParseError::ExpectedTime));
        assert_eq!(TimeRange::parse("9:00"), Err(ParseError::ExpectedDash));
        assert_eq!(
            TimeRange::parse("25:00 - 26:00"),
            Err(ParseError::TimeOutOfRange)
        );
        assert_eq!(
            TimeRange::parse("13:00 pm - 14:00"),
            Err(ParseError::TimeOutOfRange)
        );
        assert_eq!(
            TimeRange::parse("Mon/Bob 9:00-17:00"),
            Err(ParseError::ExpectedWeekday)
        );
        assert_eq!(
            TimeRange::parse("Dec 23 - nonsense"),
            Err(ParseError::ExpectedDate)
        );
        assert_eq!(
            TimeRange::parse("9:00 - 17:00 extra"),
            Err(ParseError::TrailingText)
        );
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(
            TimeRange::parse("MON/wed/FrI 9:00-17:00").unwrap(),
            TimeRange::parse("mon/WED/fri 9:00-17:00").unwrap()
        );
        assert_eq!(
            TimeRange::parse("DEC 23 - jan 2").unwrap(),
            TimeRange::parse("dec 23 - JAN 2").unwrap()
        );
    }
}
