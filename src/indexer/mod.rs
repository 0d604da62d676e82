// SPDX-License-Identifier: MPL-2.0

mod apply;
mod classify;
mod subscription;

pub use subscription::Subscription;
