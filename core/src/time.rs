// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Time related utils.

use crate::{Error, Result};
use chrono::Utc;

/// DateTime is the alias for chrono::DateTime<Utc>.
pub type DateTime = chrono::DateTime<Utc>;

/// Create datetime of now.
pub fn now() -> DateTime {
    Utc::now()
}

/// Format time into http date: `Sun, 06 Nov 1994 08:49:37 GMT`
///
/// ## Note
///
/// HTTP date is slightly different from RFC2822.
///
/// - Timezone is fixed to GMT.
/// - Day must be 2 digit.
pub fn format_http_date(t: DateTime) -> String {
    t.format("%a, %d %b %Y %T GMT").to_string()
}

/// Parse http date like `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn parse_http_date(s: &str) -> Result<DateTime> {
    chrono::DateTime::parse_from_rfc2822(s)
        .map(|v| v.with_timezone(&Utc))
        .map_err(|e| Error::unexpected(format!("parse http date {s} failed")).with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime {
        DateTime::from_timestamp(784111777, 0).expect("timestamp must be valid")
    }

    #[test]
    fn test_format_http_date() {
        let t = test_time();
        assert_eq!("Sun, 06 Nov 1994 08:49:37 GMT", format_http_date(t));
    }

    #[test]
    fn test_parse_http_date() {
        let t = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").expect("must be valid");
        assert_eq!(t, test_time());
    }
}
