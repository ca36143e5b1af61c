/**
 * @file mod.rs
 * @author Mike Hamburg
 * @copyright 2020-2022 Rambus Inc.
 *
 * Banded GF(2) elimination for uniform maps: window-aligned row
 * vectors and a striped wavefront solver.  These only support
 * enough operations to build the uniform map construction.
 */
pub mod row;
pub mod solve;
