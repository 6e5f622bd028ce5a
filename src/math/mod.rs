// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Math modules for Lie groups and iterative optimization.

pub mod optimizer;
pub mod se3;
pub mod so3;
